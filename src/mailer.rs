use std::borrow::Cow;

use async_trait::async_trait;
use tracing::{debug, info};

/// Outbound email seam.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, to: &str, name: &str, code: &str) -> anyhow::Result<()>;
}

/// Development mailer: the message body goes to the `taskd::mail` target at
/// debug level instead of an SMTP relay. Release builds mask the code.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, to: &str, name: &str, code: &str) -> anyhow::Result<()> {
        debug!(
            target: "taskd::mail",
            %to,
            "Hi {name}, your verification code is {}",
            logged_code(code)
        );
        info!(%to, "verification email dispatched");
        Ok(())
    }
}

fn logged_code(code: &str) -> Cow<'_, str> {
    if cfg!(debug_assertions) {
        Cow::Borrowed(code)
    } else {
        Cow::Owned(mask(code))
    }
}

fn mask(code: &str) -> String {
    "*".repeat(code.chars().count())
}

#[cfg(test)]
pub use recording::RecordingMailer;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_builds_never_log_the_code() {
        assert_eq!(mask("042917"), "******");
        assert_eq!(mask(""), "");

        let logged = logged_code("042917");
        if cfg!(debug_assertions) {
            assert_eq!(logged, "042917");
        } else {
            assert_eq!(logged, "******");
        }
    }
}
