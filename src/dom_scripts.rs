//! Page-context helper scripts.
//!
//! Each helper lives in its own `.js` file under `scripts/` so editors can
//! highlight it, and is bundled as a string at compile time. The builders below
//! turn a helper plus its arguments into a self-invoking expression suitable for
//! `Runtime.evaluate`. Arguments are always JSON-encoded, never spliced as raw
//! text.

use serde_json::Value;

/// Returns `{ invalid, count, visible }` for a CSS locator.
pub const QUERY_ELEMENT_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/query_element.js"
));

/// Sets a text value through the native setter and dispatches `input`/`change`.
pub const FILL_FIELD_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/fill_field.js"
));

/// True when a form's action, id or name mentions a login.
pub const LOGIN_FORM_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/login_form.js"
));

/// Injects a stylesheet disabling animations, transitions and caret blink.
pub const SUPPRESS_MOTION_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/suppress_motion.js"
));

pub const BODY_TEXT_EXPRESSION: &str = "document.body ? document.body.innerText : ''";

pub const READY_STATE_EXPRESSION: &str = "document.readyState";

/// Status strings returned by [`FILL_FIELD_SCRIPT`].
pub const FILL_OK: &str = "ok";
pub const FILL_MISSING: &str = "missing";
pub const FILL_INVALID: &str = "invalid";
pub const FILL_NOT_TEXT: &str = "not_text";

fn invoke(script: &str, args: &[Value]) -> String {
    let args = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("({})({})", script.trim(), args)
}

pub fn query_element_expression(locator: &str) -> String {
    invoke(QUERY_ELEMENT_SCRIPT, &[Value::from(locator)])
}

pub fn fill_field_expression(locator: &str, value: &str) -> String {
    invoke(
        FILL_FIELD_SCRIPT,
        &[Value::from(locator), Value::from(value)],
    )
}

pub fn login_form_expression() -> String {
    invoke(LOGIN_FORM_SCRIPT, &[])
}

pub fn suppress_motion_expression() -> String {
    invoke(SUPPRESS_MOTION_SCRIPT, &[])
}
