//! External service integrations exposed as tools

pub mod calendar;
pub mod home_assistant;
pub mod post_generator;
pub mod reminders;

/// Turn a non-success response into an integration error carrying the body
pub(crate) async fn check_status(
    service: &str,
    response: reqwest::Response,
) -> crate::Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(crate::Error::Integration(format!(
        "{service} API error: {status} - {body}"
    )))
}
