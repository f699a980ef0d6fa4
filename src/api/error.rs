use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Infra,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
    pub error_kind: ErrorKind,
    pub error_code: String,
}

impl ErrorResponse {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: message.into(),
            error_kind: kind,
            error_code: code.into(),
        }
    }
}
