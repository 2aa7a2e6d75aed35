//! The USSD donation conversation.
//!
//! ```text
//! (empty text) ──► Menu ──1──► SelectProject ──n──► EnterAmount ──amount──► Confirm ──1──► END success
//!                   │  ▲            │                  ▲   │ invalid            │ 2
//!                   │  └─────0──────┘                  │   └──► (re-prompt)     ├──► EnterAmount
//!                   └─2/3/4──► END info                └────────────────────────┘ 0 ──► END cancelled
//! ```
//!
//! Every turn answers with a [`MenuScreen`]; failures become an `END`
//! screen and the session is deleted. Terminal screens always delete the
//! session before the response leaves [`UssdService::handle_turn`].
//!
//! Turns that share a session id run one at a time, so a gateway retry that
//! overlaps the original sees the state the original left behind.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, Project};
use crate::config::DonationPolicy;
use crate::errors::{GatewayError, Result};
use crate::input::{last_segment, parse_index, parse_number};
use crate::ledger::Settlement;
use crate::locale::{Locale, LocaleTable, TextKey};
use crate::pledges::{Pledge, PledgeLog};
use crate::receipts::{mask_phone, ReceiptDispatcher};
use crate::roundup::round_up;
use crate::screen::MenuScreen;
use crate::session::{Session, SessionStore, Stage};

/// Root menu options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuChoice {
    Donate,
    ViewProjects,
    MyImpact,
    Help,
}

impl MenuChoice {
    fn from_input(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Self::Donate),
            "2" => Some(Self::ViewProjects),
            "3" => Some(Self::MyImpact),
            "4" => Some(Self::Help),
            _ => None,
        }
    }
}

/// A confirmed donation whose side effects wait until the session is gone.
struct Confirmed {
    pledge: Pledge,
    receipt: String,
}

/// One mutex per session id with a turn in flight.
#[derive(Default)]
struct TurnLocks {
    held: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TurnLocks {
    async fn acquire(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.held
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the entry once no other turn for `session_id` holds or awaits it.
    async fn release(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut held = self.held.lock().await;
        if held
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            held.remove(session_id);
        }
    }
}

pub struct UssdService {
    sessions: Arc<dyn SessionStore>,
    turns: TurnLocks,
    catalog: Arc<Catalog>,
    locales: LocaleTable,
    policy: DonationPolicy,
    receipts: ReceiptDispatcher,
    settlement: Settlement,
    pledges: Arc<dyn PledgeLog>,
}

impl UssdService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        catalog: Arc<Catalog>,
        locales: LocaleTable,
        policy: DonationPolicy,
        receipts: ReceiptDispatcher,
        settlement: Settlement,
        pledges: Arc<dyn PledgeLog>,
    ) -> Self {
        Self {
            sessions,
            turns: TurnLocks::default(),
            catalog,
            locales,
            policy,
            receipts,
            settlement,
            pledges,
        }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Apply one gateway callback. Never fails: every error is rendered.
    pub async fn handle_turn(&self, session_id: &str, phone_number: &str, text: &str) -> MenuScreen {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            warn!("USSD callback without a session id");
            return self.internal_error();
        }

        let lock = self.turns.acquire(session_id).await;
        let screen = {
            let _turn = lock.lock().await;
            self.run_turn(session_id, phone_number.trim(), text).await
        };
        self.turns.release(session_id, lock).await;
        screen
    }

    async fn run_turn(&self, session_id: &str, phone_number: &str, text: &str) -> MenuScreen {
        match self.advance(session_id, phone_number, text).await {
            Ok(screen) => screen,
            Err(e) => {
                error!("Session {session_id}: turn failed: {e}");
                if let Err(e) = self.sessions.delete(session_id).await {
                    error!("Session {session_id}: could not delete after failure: {e}");
                }
                self.internal_error()
            }
        }
    }

    async fn advance(&self, session_id: &str, phone_number: &str, text: &str) -> Result<MenuScreen> {
        if text.trim().is_empty() {
            return self.start(session_id, phone_number, text).await;
        }

        let Some(mut session) = self.sessions.get(session_id).await? else {
            info!("Session {session_id}: no state for history {text:?}, restarting");
            return self.start(session_id, phone_number, text).await;
        };

        if let Some(screen) = session.replay(text) {
            debug!("Session {session_id}: repeated history, replaying last screen");
            return Ok(screen.clone());
        }

        session.phone_number = phone_number.to_string();
        let from = session.stage;
        let (screen, confirmed) = self.transition(&mut session, last_segment(text)).await?;

        if screen.is_terminal() {
            session.stage = Stage::Done;
            self.sessions.delete(session_id).await?;
            info!("Session {session_id}: ended from {}", from.as_str());
            if let Some(confirmed) = confirmed {
                self.hand_off(confirmed);
            }
        } else {
            debug!(
                "Session {session_id}: {} -> {}",
                from.as_str(),
                session.stage.as_str()
            );
            session.remember(text, &screen);
            self.sessions.put(session).await?;
        }
        Ok(screen)
    }

    /// Create (or reset) the session at the root menu.
    async fn start(&self, session_id: &str, phone_number: &str, text: &str) -> Result<MenuScreen> {
        let mut session = Session::new(session_id, phone_number, self.locales.default_locale());
        let screen = MenuScreen::con(self.locales.get(self.locale(&session), TextKey::RootMenu));
        session.remember(text, &screen);
        self.sessions.put(session).await?;
        info!("Session {session_id}: started for {}", mask_phone(phone_number));
        Ok(screen)
    }

    async fn transition(
        &self,
        session: &mut Session,
        input: &str,
    ) -> Result<(MenuScreen, Option<Confirmed>)> {
        let screen = match session.stage {
            Stage::Confirm => return self.on_confirm(session, input),
            Stage::Menu => self.on_menu(session, input).await?,
            Stage::SelectProject => self.on_select_project(session, input),
            Stage::EnterAmount => self.on_enter_amount(session, input)?,
            Stage::Done => {
                warn!("Session {}: turn on a finished session", session.session_id);
                self.end(session, TextKey::InvalidOption)
            }
        };
        Ok((screen, None))
    }

    /// Hand a confirmed donation to settlement and the receipt sender. Both
    /// run detached; neither outcome changes the screen.
    fn hand_off(&self, confirmed: Confirmed) {
        let phone_number = confirmed.pledge.phone.clone();
        self.settlement.submit(confirmed.pledge);
        self.receipts.dispatch(phone_number, confirmed.receipt);
    }

    async fn on_menu(&self, session: &mut Session, input: &str) -> Result<MenuScreen> {
        let locale = self.locale(session);
        let Some(choice) = MenuChoice::from_input(input) else {
            info!("Session {}: invalid menu option {input:?}", session.session_id);
            return Ok(self.end(session, TextKey::InvalidOption));
        };

        match choice {
            MenuChoice::Donate => {
                if self.catalog.is_empty() {
                    return Ok(self.end(session, TextKey::NoProjects));
                }
                session.stage = Stage::SelectProject;
                Ok(MenuScreen::con(self.project_list(locale, true)))
            }
            MenuChoice::ViewProjects => {
                if self.catalog.is_empty() {
                    return Ok(self.end(session, TextKey::NoProjects));
                }
                Ok(MenuScreen::end(self.project_list(locale, false)))
            }
            MenuChoice::MyImpact => {
                let impact = self.pledges.impact_for(&session.phone_number).await?;
                if impact.count == 0 {
                    return Ok(self.end(session, TextKey::ImpactEmpty));
                }
                Ok(MenuScreen::end(self.locales.render(
                    locale,
                    TextKey::ImpactSummary,
                    &[
                        ("count", &impact.count.to_string()),
                        ("total", &impact.total.to_string()),
                        ("currency", &self.policy.currency),
                    ],
                )))
            }
            MenuChoice::Help => Ok(self.end(session, TextKey::Help)),
        }
    }

    fn on_select_project(&self, session: &mut Session, input: &str) -> MenuScreen {
        let locale = self.locale(session);
        if input.trim() == "0" {
            session.stage = Stage::Menu;
            session.selected_project_id = None;
            session.amount = None;
            return MenuScreen::con(self.locales.get(locale, TextKey::RootMenu));
        }

        let Some(project) = parse_index(input).and_then(|i| self.catalog.get(i)) else {
            info!("Session {}: invalid project choice {input:?}", session.session_id);
            return self.end(session, TextKey::InvalidProject);
        };

        session.selected_project_id = Some(project.id);
        session.stage = Stage::EnterAmount;
        MenuScreen::con(format!(
            "{}\n{}",
            self.project_detail(locale, project),
            self.amount_prompt(locale)
        ))
    }

    fn on_enter_amount(&self, session: &mut Session, input: &str) -> Result<MenuScreen> {
        let locale = self.locale(session);
        let project = self.selected_project(session)?;

        let Some(amount) = parse_number(input).filter(|a| self.policy.accepts(*a)) else {
            info!("Session {}: rejected amount {input:?}", session.session_id);
            return Ok(MenuScreen::con(format!(
                "{}\n{}",
                self.locales.get(locale, TextKey::AmountInvalid),
                self.amount_prompt(locale)
            )));
        };

        session.amount = Some(amount);
        session.stage = Stage::Confirm;
        Ok(MenuScreen::con(self.confirm_prompt(locale, project, amount)))
    }

    fn on_confirm(
        &self,
        session: &mut Session,
        input: &str,
    ) -> Result<(MenuScreen, Option<Confirmed>)> {
        let locale = self.locale(session);
        match input.trim() {
            "1" => {
                let project = self.selected_project(session)?;
                let amount = session
                    .amount
                    .filter(|a| self.policy.accepts(*a))
                    .ok_or_else(|| {
                        GatewayError::Session("confirm reached without a valid amount".to_string())
                    })?;

                let reference = new_reference();
                let amount_text = amount.to_string();
                let args = [
                    ("amount", amount_text.as_str()),
                    ("currency", self.policy.currency.as_str()),
                    ("name", project.name.get(locale)),
                    ("reference", reference.as_str()),
                ];

                let confirmed = Confirmed {
                    pledge: Pledge {
                        reference: reference.clone(),
                        session_id: session.session_id.clone(),
                        phone: session.phone_number.clone(),
                        project_id: project.id,
                        amount,
                        currency: self.policy.currency.clone(),
                    },
                    receipt: self.locales.render(locale, TextKey::ReceiptSms, &args),
                };

                session.stage = Stage::Done;
                info!(
                    "Session {}: donation {reference} of {amount} {} to project {} confirmed",
                    session.session_id, self.policy.currency, project.id
                );
                let screen = MenuScreen::end(self.locales.render(locale, TextKey::Success, &args));
                Ok((screen, Some(confirmed)))
            }
            "2" => {
                session.stage = Stage::EnterAmount;
                Ok((MenuScreen::con(self.amount_prompt(locale)), None))
            }
            "0" => {
                info!("Session {}: donation cancelled", session.session_id);
                Ok((self.end(session, TextKey::Cancelled), None))
            }
            _ => {
                info!("Session {}: invalid confirm option {input:?}", session.session_id);
                Ok((self.end(session, TextKey::InvalidOption), None))
            }
        }
    }

    // ─────────────────────────────────────────────────────────
    // Rendering helpers
    // ─────────────────────────────────────────────────────────

    fn locale(&self, session: &Session) -> Locale {
        session.locale.unwrap_or(self.locales.default_locale())
    }

    fn end(&self, session: &Session, key: TextKey) -> MenuScreen {
        MenuScreen::end(self.locales.get(self.locale(session), key))
    }

    fn internal_error(&self) -> MenuScreen {
        MenuScreen::end(
            self.locales
                .get(self.locales.default_locale(), TextKey::InternalError),
        )
    }

    fn selected_project(&self, session: &Session) -> Result<&Project> {
        let id = session.selected_project_id.ok_or_else(|| {
            GatewayError::Session(format!("stage {} without a project", session.stage.as_str()))
        })?;
        self.catalog
            .find(id)
            .ok_or_else(|| GatewayError::Session(format!("project {id} left the catalog")))
    }

    fn project_list(&self, locale: Locale, selectable: bool) -> String {
        let header = if selectable {
            TextKey::SelectProjectHeader
        } else {
            TextKey::ProjectsHeader
        };
        let mut lines = vec![self.locales.get(locale, header).to_string()];
        for (i, project) in self.catalog.projects().iter().enumerate() {
            lines.push(self.locales.render(
                locale,
                TextKey::ProjectLine,
                &[
                    ("index", &(i + 1).to_string()),
                    ("name", project.name.get(locale)),
                    ("percent", &project.funding_percent().to_string()),
                    ("location", project.location.get(locale)),
                ],
            ));
        }
        if selectable {
            lines.push(self.locales.get(locale, TextKey::BackOption).to_string());
        }
        lines.join("\n")
    }

    fn project_detail(&self, locale: Locale, project: &Project) -> String {
        self.locales.render(
            locale,
            TextKey::ProjectDetail,
            &[
                ("name", project.name.get(locale)),
                ("description", project.description.get(locale)),
                ("location", project.location.get(locale)),
                ("raised", &project.raised.to_string()),
                ("goal", &project.goal.to_string()),
                ("currency", &self.policy.currency),
            ],
        )
    }

    fn amount_prompt(&self, locale: Locale) -> String {
        self.locales.render(
            locale,
            TextKey::EnterAmount,
            &[
                ("min", &self.policy.min_amount.to_string()),
                ("max", &self.policy.max_amount.to_string()),
                ("currency", &self.policy.currency),
            ],
        )
    }

    fn confirm_prompt(&self, locale: Locale, project: &Project, amount: u64) -> String {
        let currency = self.policy.currency.as_str();
        let mut lines = vec![self.locales.render(
            locale,
            TextKey::ConfirmSummary,
            &[
                ("amount", &amount.to_string()),
                ("currency", currency),
                ("name", project.name.get(locale)),
            ],
        )];

        let round = round_up(amount, self.policy.round_up_unit);
        if round.has_donation() {
            lines.push(self.locales.render(
                locale,
                TextKey::RoundUpLine,
                &[
                    ("rounded", &round.rounded_to.to_string()),
                    ("donation", &round.donation.to_string()),
                    ("currency", currency),
                ],
            ));
        }
        lines.push(self.locales.get(locale, TextKey::ConfirmOptions).to_string());
        lines.join("\n")
    }
}

/// Opaque donation reference shown to the caller, e.g. `PIFP-3FA91C07`.
fn new_reference() -> String {
    format!("PIFP-{}", hex::encode_upper(rand::random::<[u8; 4]>()))
}
