//! Per-conversation state and the store that holds it between turns.
//!
//! Sessions are ephemeral: they live in memory, are deleted on every
//! terminal screen and are purged by [`run_sweeper`] when a caller walks
//! away mid-menu.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::locale::Locale;
use crate::screen::MenuScreen;

/// Where a conversation currently is. Sessions are created at `Menu`;
/// there is no stored state before the root menu has been shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Menu,
    SelectProject,
    EnterAmount,
    Confirm,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Menu => "menu",
            Self::SelectProject => "select_project",
            Self::EnterAmount => "enter_amount",
            Self::Confirm => "confirm",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub stage: Stage,
    pub locale: Option<Locale>,
    pub selected_project_id: Option<u64>,
    /// Minor units; kept across "change amount" until overwritten.
    pub amount: Option<u64>,
    pub phone_number: String,
    /// Accumulated `text` of the last applied turn and the screen it produced.
    pub last_input: Option<String>,
    pub last_screen: Option<MenuScreen>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: &str, phone_number: &str, locale: Locale) -> Self {
        Self {
            session_id: session_id.to_string(),
            stage: Stage::Menu,
            locale: Some(locale),
            selected_project_id: None,
            amount: None,
            phone_number: phone_number.to_string(),
            last_input: None,
            last_screen: None,
            updated_at: Utc::now(),
        }
    }

    /// Screen to replay when the gateway resends `text` unchanged.
    pub fn replay(&self, text: &str) -> Option<&MenuScreen> {
        match &self.last_input {
            Some(last) if last == text => self.last_screen.as_ref(),
            _ => None,
        }
    }

    pub fn remember(&mut self, text: &str, screen: &MenuScreen) {
        self.last_input = Some(text.to_string());
        self.last_screen = Some(screen.clone());
        self.updated_at = Utc::now();
    }
}

/// Session persistence between turns.
///
/// Turns for one session id are serialized by the gateway; implementations
/// only need to keep concurrent access to different ids independent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;
    async fn put(&self, session: Session) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;
    /// Drop sessions idle for longer than `max_idle`, returning how many went.
    async fn purge_idle(&self, max_idle: Duration) -> Result<usize>;
    async fn active(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn put(&self, session: Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn purge_idle(&self, max_idle: Duration) -> Result<usize> {
        let cutoff = chrono::Duration::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.updated_at >= cutoff);
        Ok(before - sessions.len())
    }

    async fn active(&self) -> Result<usize> {
        Ok(self.sessions.read().await.len())
    }
}

/// Periodically purge idle sessions until `shutdown` fires.
pub async fn run_sweeper(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    max_idle: Duration,
    shutdown: CancellationToken,
) {
    info!("Session sweeper running every {interval:?}, idle limit {max_idle:?}");
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Session sweeper stopped");
                return;
            }
            _ = ticker.tick() => {
                match store.purge_idle(max_idle).await {
                    Ok(0) => {}
                    Ok(n) => debug!("Purged {n} idle sessions"),
                    Err(e) => warn!("Session sweep failed: {e}"),
                }
            }
        }
    }
}
