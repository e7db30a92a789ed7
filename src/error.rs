use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    InvalidInput,
    MethodNotAllowed,
    NotFound,
    Storage,
    Unauthorized,
    Unknown,
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn storage(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Storage,
            code: "storage_unavailable",
            public,
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_input",
            public,
            source,
        }
    }

    pub fn invalid_with_code(
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code,
            public,
            source,
        }
    }

    pub fn unauthorized(code: &'static str, public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unauthorized,
            code,
            public,
            source,
        }
    }

    pub fn missing_token() -> Self {
        Self::unauthorized(
            "missing_token",
            "Authentication token is required",
            anyhow!("request carried no bearer token"),
        )
    }

    pub fn invalid_token(source: anyhow::Error) -> Self {
        Self::unauthorized("invalid_token", "Authentication token is invalid", source)
    }

    pub fn missing_identity() -> Self {
        Self::unauthorized(
            "missing_identity",
            "Authentication token carries no identity",
            anyhow!("verified token payload has no userid claim"),
        )
    }

    pub fn invalid_credentials() -> Self {
        Self::unauthorized(
            "invalid_credentials",
            "Invalid email or password",
            anyhow!("credential check failed"),
        )
    }

    pub fn conflict(code: &'static str, public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            code,
            public,
            source,
        }
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            source,
        }
    }

    pub fn method_not_allowed(source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::MethodNotAllowed,
            code: "method_not_allowed",
            public: "Method not allowed.",
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            source,
        }
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }
}

impl std::fmt::Display for LibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.public, self.code, self.source)
    }
}

impl std::error::Error for LibError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

impl From<serde_json::Error> for LibError {
    fn from(value: serde_json::Error) -> Self {
        Self::storage("Storage document could not be encoded", anyhow!(value))
    }
}
