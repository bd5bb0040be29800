use std::thread;

/// Spawns a thread with a human-readable name, which shows up in panics, thread
/// dumps, and `tracing` span output. Used everywhere a long-lived worker
/// thread is spawned instead of calling `thread::spawn` directly.
pub fn spawn_named_thread<F, T, S>(name: S, f: F) -> thread::JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
    S: ToString,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .expect("thread config should be valid")
}
