use std::fmt;

#[derive(Debug)]
pub enum ExportError {
    MalformedInput(String),
    UnrecognizedInput(String),
    UnsupportedFormat(String),
    UnsupportedProfile(String),
    UnsupportedCompression(String),
    StandardViolation(String),
    UnsupportedFont(String),
    SizeLimit(String),
    ProfileMissing(String),
    InternalError(String),
    Io(std::io::Error),
}

impl ExportError {
    /// Stable machine-readable code for logs and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::MalformedInput(_) => "MALFORMED_INPUT",
            ExportError::UnrecognizedInput(_) => "UNRECOGNIZED_INPUT",
            ExportError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ExportError::UnsupportedProfile(_) => "UNSUPPORTED_PROFILE",
            ExportError::UnsupportedCompression(_) => "UNSUPPORTED_COMPRESSION",
            ExportError::StandardViolation(_) => "STANDARD_VIOLATION",
            ExportError::UnsupportedFont(_) => "UNSUPPORTED_FONT",
            ExportError::SizeLimit(_) => "SIZE_LIMIT",
            ExportError::ProfileMissing(_) => "PROFILE_MISSING",
            ExportError::InternalError(_) | ExportError::Io(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ExportError::MalformedInput(_)
            | ExportError::UnrecognizedInput(_)
            | ExportError::UnsupportedFormat(_)
            | ExportError::UnsupportedProfile(_)
            | ExportError::UnsupportedCompression(_)
            | ExportError::StandardViolation(_)
            | ExportError::UnsupportedFont(_) => 400,
            ExportError::SizeLimit(_) => 413,
            ExportError::ProfileMissing(_)
            | ExportError::InternalError(_)
            | ExportError::Io(_) => 500,
        }
    }

    /// True for faults whose detail must not leak into a response body.
    pub fn is_internal(&self) -> bool {
        self.http_status() >= 500
    }

    /// Bare message without the kind prefix used by `Display`.
    pub fn message(&self) -> String {
        match self {
            ExportError::MalformedInput(message)
            | ExportError::UnrecognizedInput(message)
            | ExportError::UnsupportedFormat(message)
            | ExportError::UnsupportedProfile(message)
            | ExportError::UnsupportedCompression(message)
            | ExportError::StandardViolation(message)
            | ExportError::UnsupportedFont(message)
            | ExportError::SizeLimit(message)
            | ExportError::ProfileMissing(message)
            | ExportError::InternalError(message) => message.clone(),
            ExportError::Io(err) => err.to_string(),
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::MalformedInput(message) => write!(f, "malformed input: {}", message),
            ExportError::UnrecognizedInput(message) => {
                write!(f, "unrecognized input: {}", message)
            }
            ExportError::UnsupportedFormat(message) => {
                write!(f, "unsupported format: {}", message)
            }
            ExportError::UnsupportedProfile(message) => {
                write!(f, "unsupported color profile: {}", message)
            }
            ExportError::UnsupportedCompression(message) => {
                write!(f, "unsupported compression: {}", message)
            }
            ExportError::StandardViolation(message) => {
                write!(f, "pdf standard violation: {}", message)
            }
            ExportError::UnsupportedFont(message) => write!(f, "unsupported font: {}", message),
            ExportError::SizeLimit(message) => write!(f, "size limit exceeded: {}", message),
            ExportError::ProfileMissing(message) => {
                write!(f, "color profile missing: {}", message)
            }
            ExportError::InternalError(message) => write!(f, "internal error: {}", message),
            ExportError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(value: std::io::Error) -> Self {
        ExportError::Io(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_bad_request() {
        let cases = [
            ExportError::MalformedInput("x".to_string()),
            ExportError::UnrecognizedInput("x".to_string()),
            ExportError::UnsupportedFormat("x".to_string()),
            ExportError::UnsupportedProfile("x".to_string()),
            ExportError::UnsupportedCompression("x".to_string()),
            ExportError::StandardViolation("x".to_string()),
            ExportError::UnsupportedFont("x".to_string()),
        ];
        for err in cases {
            assert_eq!(err.http_status(), 400, "{}", err.kind());
            assert!(!err.is_internal());
        }
    }

    #[test]
    fn size_limit_and_internal_statuses() {
        assert_eq!(ExportError::SizeLimit("big".to_string()).http_status(), 413);
        assert_eq!(ExportError::InternalError("boom".to_string()).http_status(), 500);
        let io = ExportError::from(std::io::Error::other("disk"));
        assert_eq!(io.http_status(), 500);
        assert_eq!(io.kind(), "INTERNAL_ERROR");
        assert!(std::error::Error::source(&io).is_some());
    }

    #[test]
    fn display_prefixes_kind_but_message_is_bare() {
        let err = ExportError::StandardViolation("transparency is not allowed".to_string());
        assert_eq!(
            err.to_string(),
            "pdf standard violation: transparency is not allowed"
        );
        assert_eq!(err.message(), "transparency is not allowed");
    }
}
