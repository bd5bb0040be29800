pub mod thread_context;
pub mod threads;

/// Parses a human-friendly duration string (`"10s"`, `"5m"`, `"2h"`) the same
/// way the rest of this crate's configuration does, via `duration-str`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<std::time::Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    duration_str::deserialize_duration(deserializer)
}
