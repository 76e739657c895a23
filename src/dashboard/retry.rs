use std::future::Future;
use tracing::warn;

use super::{DashboardClient, DashboardError, LoginCredentials, Session};
use crate::models::Node;

/// Runs `operation` with the current session. If the dashboard answers with
/// `AuthRequired`, logs in once, swaps the fresh session into `session`, and
/// runs `operation` one more time. A second rejection is fatal.
pub async fn with_reauth<T, Op, Fut>(
    client: &DashboardClient,
    session: &mut Session,
    login: Option<&LoginCredentials>,
    operation: Op,
) -> Result<T, DashboardError>
where
    Op: Fn(Session) -> Fut,
    Fut: Future<Output = Result<T, DashboardError>>,
{
    match operation(session.clone()).await {
        Err(DashboardError::AuthRequired) => {}
        other => return other,
    }

    let Some(login) = login else {
        return Err(DashboardError::Auth(
            "credential was rejected and no username/password is configured to refresh it"
                .to_string(),
        ));
    };

    warn!(origin = ?session.origin(), "Session rejected by dashboard; re-authenticating once.");
    *session = client.authenticate(login).await?;

    match operation(session.clone()).await {
        Err(DashboardError::AuthRequired) => Err(DashboardError::Auth(
            "dashboard rejected a freshly issued credential".to_string(),
        )),
        other => other,
    }
}

impl DashboardClient {
    /// `fetch` wrapped in the single re-authentication retry.
    pub async fn fetch_with_reauth(
        &self,
        session: &mut Session,
        login: Option<&LoginCredentials>,
    ) -> Result<Vec<Node>, DashboardError> {
        with_reauth(self, session, login, |current| async move {
            self.fetch(&current).await
        })
        .await
    }
}
