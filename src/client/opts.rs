use crate::job::DelayFn;

/// Maximum number of claim attempts in `lock_job` before giving up. Bounds
/// the race-retry loop so pathological contention cannot livelock a worker.
pub(crate) const DEFAULT_MAX_LOCK_ATTEMPTS: u32 = 10;

#[derive(Clone)]
pub(crate) struct ClientOptions {
    pub(crate) schema: String,
    pub(crate) max_lock_attempts: u32,
    pub(crate) delay_fn: Option<DelayFn>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            schema: "public".to_string(),
            max_lock_attempts: DEFAULT_MAX_LOCK_ATTEMPTS,
            delay_fn: None,
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("schema", &self.schema)
            .field("max_lock_attempts", &self.max_lock_attempts)
            .field("delay_fn", &self.delay_fn.as_ref().map(|_| "custom"))
            .finish()
    }
}
