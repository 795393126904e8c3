use snafu::Snafu;

/// The `Result` type returned by `testkit`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for `testkit`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to decode secret key '{}': {}", key, source))]
    Base64 {
        key: String,
        source: base64::DecodeError,
    },

    #[snafu(display("Operation '{}' was cancelled", operation))]
    Cancelled { operation: String },

    #[snafu(display(
        "'{}' failed with exit code '{}'\n\n{}\n\n{}",
        command,
        code,
        stdout,
        stderr
    ))]
    CommandFailed {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[snafu(display(
        "Container '{}' exited with status '{}' (exit code: {})",
        name,
        status,
        exit_code
    ))]
    ContainerExited {
        name: String,
        status: String,
        exit_code: i64,
    },

    #[snafu(display("Unable to create container '{}': {}", name, source))]
    Create {
        name: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("Unable to {}: {}", action, source))]
    Http {
        action: String,
        source: reqwest::Error,
    },

    #[snafu(display("Unable to {}: server responded '{}': {}", action, status, body))]
    HttpStatus {
        action: String,
        status: u16,
        body: String,
    },

    #[snafu(display("Unable to inspect container '{}': {}", id, source))]
    Inspect {
        id: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("Unable to {}: {}", action, source))]
    Io {
        action: String,
        source: std::io::Error,
    },

    #[snafu(display("Unable to parse {} as json: {}", what, source))]
    Json {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to {}: {}", action, source))]
    Kube { action: String, source: kube::Error },

    #[snafu(display("Unable to read kubeconfig: {}", source))]
    Kubeconfig {
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("A helm release name is required for chart '{}'", chart))]
    MissingReleaseName { chart: String },

    #[snafu(display("No port mapping found for port '{}/tcp' of container '{}'", port, name))]
    NoPortMapping { name: String, port: u16 },

    #[snafu(display("Unable to find {}", what))]
    NotFound { what: String },

    #[snafu(display("{} failed to become ready after {} attempts", what, attempts))]
    NotReady { what: String, attempts: u32 },

    #[snafu(display("Container '{}' has not been started", name))]
    NotStarted { name: String },

    #[snafu(display("Unable to pull image '{}': {}", image, source))]
    Pull {
        image: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("Unable to remove container '{}': {}", name, source))]
    Remove {
        name: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("Error parsing testkit settings from the environment: {}", source))]
    Settings { source: envy::Error },

    #[snafu(display("Unable to spawn '{}': {}", program, source))]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[snafu(display("Unable to {}: {}", action, source))]
    Sql {
        action: String,
        source: tiberius::error::Error,
    },

    #[snafu(display("Unexpected result from '{}': {}", query, found))]
    SqlResult { query: String, found: String },

    #[snafu(display("Unable to start container '{}': {}", name, source))]
    Start {
        name: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("Unable to stop container '{}': {}", name, source))]
    Stop {
        name: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("Timed out waiting for {}", what))]
    Timeout { what: String },

    #[snafu(display("Unexpected {} output: '{}'", what, output))]
    UnexpectedOutput { what: String, output: String },

    #[snafu(display("Invalid url '{}': {}", url, source))]
    Url {
        url: String,
        source: url::ParseError,
    },

    #[snafu(display("Unable to {}: {}", action, source))]
    Yaml {
        action: String,
        source: serde_yaml::Error,
    },
}

impl Error {
    /// Returns `true` if this error, or the error it wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled { .. } => true,
            Error::Create { source, .. }
            | Error::Inspect { source, .. }
            | Error::Pull { source, .. }
            | Error::Remove { source, .. }
            | Error::Start { source, .. }
            | Error::Stop { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
