use redis::Script;
use std::sync::LazyLock;

pub const UNLOCK_SCRIPT_BODY: &str = include_str!("../../lua/unlock.lua");
pub const APPLY_SCRIPT_TEMPLATE: &str = include_str!("../../lua/apply.lua");

/// Placeholder line in the apply template replaced by the migration body.
const BODY_MARKER: &str = "-- @body";

pub static UNLOCK_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(UNLOCK_SCRIPT_BODY));

/// Wraps a migration body in the lock-checking, history-recording apply script.
pub fn apply_script_source(body: &str) -> String {
    APPLY_SCRIPT_TEMPLATE.replacen(BODY_MARKER, body, 1)
}
