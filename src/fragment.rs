//! Identity fragments: the wire request and its validated form.
//!
//! Callers submit an email, a phone number, or both. Phone numbers may
//! arrive as JSON numbers and are normalized to the text a JavaScript caller
//! would have sent, before any comparison or storage.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A phone number as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhoneInput {
    Text(String),
    Number(serde_json::Number),
}

impl PhoneInput {
    /// Normalizes to the stored string form.
    #[must_use]
    pub fn normalize(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => number_to_string(n),
        }
    }
}

/// Renders a JSON number the way a JavaScript caller would stringify it:
/// integers exactly, integral floats without a fraction, and exponent form
/// only outside `[1e-6, 1e21)`.
fn number_to_string(n: &serde_json::Number) -> String {
    if let Some(v) = n.as_u64() {
        return v.to_string();
    }
    if let Some(v) = n.as_i64() {
        return v.to_string();
    }
    match n.as_f64() {
        Some(v) => float_to_string(v),
        None => n.to_string(),
    }
}

#[allow(clippy::float_cmp)]
fn float_to_string(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    let magnitude = v.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return v.to_string();
    }
    let exp = format!("{v:e}");
    match exp.split_once('e') {
        Some((mantissa, power)) if !power.starts_with('-') => format!("{mantissa}e+{power}"),
        _ => exp,
    }
}

impl From<&str> for PhoneInput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for PhoneInput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<u64> for PhoneInput {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

/// Identify request as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<PhoneInput>,
}

impl IdentifyRequest {
    /// Decodes a request from parsed JSON.
    ///
    /// # Errors
    /// - `InvalidPhoneNumber` when `phoneNumber` is neither a string nor a number
    /// - `MalformedRequest` for any other shape mismatch
    pub fn from_json(value: serde_json::Value) -> Result<Self, ValidationError> {
        use serde_json::Value;

        match value.get("phoneNumber") {
            None | Some(Value::Null | Value::String(_) | Value::Number(_)) => {}
            Some(other) => {
                let kind = match other {
                    Value::Bool(_) => "boolean",
                    Value::Array(_) => "array",
                    _ => "object",
                };
                return Err(ValidationError::InvalidPhoneNumber {
                    reason: format!("expected a string or a number, got {kind}"),
                });
            }
        }
        serde_json::from_value(value).map_err(|e| ValidationError::MalformedRequest {
            reason: e.to_string(),
        })
    }

    /// Validates and normalizes into a [`Fragment`].
    ///
    /// # Errors
    /// See [`Fragment::new`].
    pub fn into_fragment(self) -> Result<Fragment, ValidationError> {
        let phone = self.phone_number.as_ref().map(PhoneInput::normalize);
        Fragment::new(self.email, phone)
    }
}

/// A validated identity fragment. At least one field is `Some` and
/// non-empty; empty strings are treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fragment {
    email: Option<String>,
    phone: Option<String>,
}

impl Fragment {
    /// Builds a fragment from already-normalized values.
    ///
    /// # Errors
    /// `MissingIdentifier` when both values are absent or empty.
    pub fn new(email: Option<String>, phone: Option<String>) -> Result<Self, ValidationError> {
        let email = email.filter(|e| !e.is_empty());
        let phone = phone.filter(|p| !p.is_empty());
        if email.is_none() && phone.is_none() {
            return Err(ValidationError::MissingIdentifier);
        }
        Ok(Self { email, phone })
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }
}

/// Fluent builder for identify requests.
///
/// # Example
/// ```
/// use idresolve::IdentifyBuilder;
///
/// let fragment = IdentifyBuilder::new()
///     .email("doc@hillvalley.edu")
///     .phone(123456u64)
///     .build()
///     .unwrap();
/// assert_eq!(fragment.phone(), Some("123456"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct IdentifyBuilder {
    request: IdentifyRequest,
}

impl IdentifyBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.request.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn phone(mut self, phone: impl Into<PhoneInput>) -> Self {
        self.request.phone_number = Some(phone.into());
        self
    }

    /// Returns the unvalidated wire request.
    #[must_use]
    pub fn request(self) -> IdentifyRequest {
        self.request
    }

    /// Validates into a [`Fragment`].
    ///
    /// # Errors
    /// See [`IdentifyRequest::into_fragment`].
    pub fn build(self) -> Result<Fragment, ValidationError> {
        self.request.into_fragment()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn numeric_phone_is_normalized_to_string() {
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"email":null,"phoneNumber":123456}"#).unwrap();
        let fragment = req.into_fragment().unwrap();
        assert_eq!(fragment.phone(), Some("123456"));
        assert_eq!(fragment.email(), None);
    }

    #[test]
    fn string_phone_is_kept_verbatim() {
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"phoneNumber":"+1 555 0100"}"#).unwrap();
        assert_eq!(req.into_fragment().unwrap().phone(), Some("+1 555 0100"));
    }

    #[test]
    fn zero_is_a_real_phone_number() {
        let fragment = IdentifyBuilder::new().phone(0u64).build().unwrap();
        assert_eq!(fragment.phone(), Some("0"));
    }

    #[test]
    fn any_json_number_is_stringified() {
        let cases = [
            ("12.5", "12.5"),
            ("-5", "-5"),
            ("1e3", "1000"),
            ("1.0", "1"),
            ("-0.0", "0"),
            ("0.000001", "0.000001"),
            ("1e-7", "1e-7"),
            ("1.5e21", "1.5e+21"),
            ("18446744073709551615", "18446744073709551615"),
        ];
        for (raw, expected) in cases {
            let req: IdentifyRequest =
                serde_json::from_str(&format!(r#"{{"phoneNumber":{raw}}}"#)).unwrap();
            assert_eq!(req.into_fragment().unwrap().phone(), Some(expected), "input {raw}");
        }
    }

    #[test]
    fn non_scalar_phone_is_an_invalid_phone_number() {
        for bad in [json!(true), json!([1]), json!({ "n": 1 })] {
            let err = IdentifyRequest::from_json(json!({ "phoneNumber": bad })).unwrap_err();
            assert!(matches!(err, ValidationError::InvalidPhoneNumber { .. }), "{err}");
        }
    }

    #[test]
    fn wrongly_typed_email_is_malformed() {
        let err = IdentifyRequest::from_json(json!({ "email": 5 })).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedRequest { .. }));

        let err = IdentifyRequest::from_json(json!("a@x.com")).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedRequest { .. }));
    }

    #[test]
    fn from_json_accepts_both_phone_forms() {
        let req = IdentifyRequest::from_json(json!({ "email": "a@x.com", "phoneNumber": null }))
            .unwrap();
        assert_eq!(req.email.as_deref(), Some("a@x.com"));
        assert_eq!(req.phone_number, None);

        let req = IdentifyRequest::from_json(json!({ "phoneNumber": 42 })).unwrap();
        assert_eq!(req.into_fragment().unwrap().phone(), Some("42"));
    }

    #[test]
    fn empty_request_is_missing_identifier() {
        let req: IdentifyRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.into_fragment(), Err(ValidationError::MissingIdentifier));

        let blank = IdentifyBuilder::new().email("").phone("").build();
        assert_eq!(blank, Err(ValidationError::MissingIdentifier));
    }

    #[test]
    fn empty_email_is_dropped_when_phone_present() {
        let fragment = IdentifyBuilder::new().email("").phone("999").build().unwrap();
        assert_eq!(fragment.email(), None);
        assert_eq!(fragment.phone(), Some("999"));
    }

    #[test]
    fn non_scalar_phone_fails_to_parse() {
        assert!(serde_json::from_str::<IdentifyRequest>(r#"{"phoneNumber":true}"#).is_err());
    }
}
