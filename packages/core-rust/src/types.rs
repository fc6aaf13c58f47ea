/// Dynamic value passed to and returned from command handlers.
pub type Value = serde_json::Value;

/// Keyword-style handler arguments.
pub type Params = serde_json::Map<String, Value>;
