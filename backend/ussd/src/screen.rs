//! Rendered USSD screens and their wire form.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

const CONTINUE_PREFIX: &str = "CON";
const END_PREFIX: &str = "END";

/// One rendered menu plus whether the gateway should keep the session open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuScreen {
    pub continue_session: bool,
    pub text: String,
}

impl MenuScreen {
    /// Expect another keystroke.
    pub fn con(text: impl Into<String>) -> Self {
        Self {
            continue_session: true,
            text: text.into(),
        }
    }

    /// Final screen; the gateway closes the session.
    pub fn end(text: impl Into<String>) -> Self {
        Self {
            continue_session: false,
            text: text.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.continue_session
    }

    /// `CON <text>` or `END <text>`.
    pub fn to_wire(&self) -> String {
        let prefix = if self.continue_session {
            CONTINUE_PREFIX
        } else {
            END_PREFIX
        };
        format!("{prefix} {}", self.text)
    }
}

impl IntoResponse for MenuScreen {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_wire(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_prefixes() {
        assert_eq!(MenuScreen::con("Pick one").to_wire(), "CON Pick one");
        assert_eq!(MenuScreen::end("Bye").to_wire(), "END Bye");
        assert!(MenuScreen::end("Bye").is_terminal());
        assert!(!MenuScreen::con("Pick one").is_terminal());
    }

    #[test]
    fn response_is_plain_text_200() {
        let response = MenuScreen::end("Bye").into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
