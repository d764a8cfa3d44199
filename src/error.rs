use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration entry #{index}: {message}")]
    InvalidConfig { index: usize, message: String },

    #[error("Invalid `{field}` pattern '{pattern}' in configuration entry #{index}: {source}")]
    InvalidPattern {
        index: usize,
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Missing credential, or the API rejected it (401/403).
    #[error("Authentication error: {message}")]
    Auth { message: String },

    #[error("Not found: {target} - make sure that the file exists in the defined target")]
    NotFound { target: String },

    #[error("No marker '# gitops-replacer: {dep_name}' found")]
    MarkerNotFound { dep_name: String },

    #[error("Marker for '{dep_name}' is on the last line ({line}), no value line follows")]
    MarkerAtEof { dep_name: String, line: usize },

    #[error("Line {line} has no recognizable key/value separator: {text:?}")]
    UnparsableLine { line: usize, text: String },

    /// The remote file changed since it was fetched (409).
    #[error("Conflict: {target} was modified since it was fetched")]
    Conflict { target: String },

    #[error("Transient error after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    #[error("GitHub API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid file content for {target}: {message}")]
    Content { target: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
