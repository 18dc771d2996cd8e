/// Errors that can occur within the notification subsystem.
///
/// The [`crate::dispatcher::Dispatcher`] never lets these escape: every
/// public send collapses them into a [`crate::SendOutcome`] carrying the
/// error text.
///
/// # Examples
///
/// ```rust
/// use vigil_notify::error::NotifyError;
///
/// let err = NotifyError::NotConfigured("Email");
/// assert_eq!(err.to_string(), "Email is not configured");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Transport settings are missing or incomplete. Not retried.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// Loading transport settings from the credential store failed.
    #[error("Notify: failed to load settings: {0:#}")]
    Settings(anyhow::Error),

    /// The send was called without a single usable recipient.
    #[error("Notify: no recipients")]
    NoRecipients,

    /// A recipient or sender address could not be parsed.
    #[error("Notify: invalid address '{address}': {reason}")]
    Address { address: String, reason: String },

    /// Building the MIME message failed.
    #[error("Notify: failed to build message: {0}")]
    Message(String),

    /// SMTP transport error when sending email.
    #[error("Notify: SMTP error: {0}")]
    SmtpError(String),

    /// An HTTP request to the SMS gateway (or logo host) failed.
    #[error("Notify: HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The external API returned a non-success response.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    ApiError {
        service: String,
        status: u16,
        body: String,
    },

    /// Some SMS recipients failed; the others were still attempted.
    #[error("Notify: SMS failed for {failed} of {total} recipients: {first_error}")]
    PartialFailure {
        failed: usize,
        total: usize,
        first_error: String,
    },

    /// Rendering a notification template failed.
    #[error("Notify: template rendering error: {0}")]
    TemplateError(String),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
