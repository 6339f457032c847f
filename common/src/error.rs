/// All errors possible to occur in the manager and the simulator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error originating from the `kube-rs` crate
    #[error("Kubernetes error: {source}")]
    KubeError {
        #[from]
        source: kube::Error,
    },

    /// Kubeconfig parsing or loading error
    #[error("kubeconfig error: {source}")]
    KubeconfigError {
        #[from]
        source: kube::config::KubeconfigError,
    },

    #[error("i/o error: {source}")]
    IOError {
        #[from]
        source: std::io::Error,
    },

    /// Serde json decode error
    #[error("decode json error: {source}")]
    JSONError {
        #[from]
        source: serde_json::Error,
    },

    /// Serde yaml decode error
    #[error("decode yaml error: {source}")]
    YAMLError {
        #[from]
        source: serde_yaml::Error,
    },

    /// Malformed or unreadable zip archive
    #[error("zip error: {source}")]
    ZipError {
        #[from]
        source: zip::result::ZipError,
    },

    #[error("http request error: {source}")]
    HttpError {
        #[from]
        source: http::Error,
    },

    #[error("reqwest error: {source}")]
    ReqwestError {
        #[from]
        source: reqwest::Error,
    },

    /// Certificate generation error
    #[error("certificate error: {source}")]
    CertError {
        #[from]
        source: rcgen::Error,
    },

    #[error("tls error: {source}")]
    TlsError {
        #[from]
        source: rustls::Error,
    },

    /// Embedded store error
    #[error("store error: {source}")]
    StoreError {
        #[from]
        source: sled::Error,
    },

    #[error("task join error: {source}")]
    JoinError {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Missing or unusable configuration, surfaced before any work starts.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// The SupportBundle was not in the state the manager requires.
    #[error("invalid start state {0}")]
    InvalidStateError(String),

    /// Unparsable taint toleration supplied on the command line.
    #[error("invalid toleration: {0}")]
    TolerationError(String),

    /// Generic error based on a string description
    #[error("error: {0}")]
    GenericError(String),
}
