//! Filter formulas for the table store's `filterByFormula` parameter.
//!
//! Values are interpolated into the formula text, so every value goes through
//! `escape` first; an unescaped `'` would end the string literal early.

pub fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `{field} = 'value'`
pub fn field_equals(field: &str, value: &str) -> String {
    format!("{{{field}}} = '{}'", escape(value))
}

/// `RECORD_ID() = 'id'`
pub fn record_id_equals(id: &str) -> String {
    format!("RECORD_ID() = '{}'", escape(id))
}

/// `AND(a, b, ...)`; a single clause is returned as-is and an empty list never matches.
pub fn all_of(clauses: &[String]) -> String {
    match clauses {
        [] => "FALSE()".to_string(),
        [only] => only.clone(),
        many => format!("AND({})", many.join(", ")),
    }
}
