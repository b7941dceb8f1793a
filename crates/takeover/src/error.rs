use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    // -- Load time
    CliUsage(String),
    Fingerprints(String),
    InvalidResolver(String),
    EmptyTargets,

    // -- Externals
    #[from]
    File(std::io::Error),

    #[from]
    Json(serde_json::Error),

    #[from]
    Reqwest(reqwest::Error),

    #[from]
    Join(tokio::task::JoinError),

    #[from]
    SystemTime(std::time::SystemTimeError),
}

// region:    --- Error Boilerplate

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}

// endregion: --- Error Boilerplate
