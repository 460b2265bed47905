/// Drop every `null` entry from a JSON object, one level deep.
///
/// Client sections of the config carry optional keys as explicit `null`;
/// those must behave exactly like absent keys so serde defaults apply.
/// Non-object values are returned untouched.
pub fn strip_nulls(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        ),
        other => other,
    }
}

/// Quote an identifier with double quotes, escaping embedded quotes by
/// doubling them (SQL style).
pub fn quote_sql_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
