use log::debug;
use scraper::{Html, Selector};

use crate::errors::{FloorsheetError, Result};

pub const VIEW_STATE: &str = "__VIEWSTATE";
pub const EVENT_VALIDATION: &str = "__EVENTVALIDATION";
pub const VIEW_STATE_GENERATOR: &str = "__VIEWSTATEGENERATOR";

/// Ordered postback field set. The server expects every known field echoed back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields(Vec<(String, String)>);

impl FormFields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, name: &str, value: &str) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.to_string(),
            None => self.0.push((name.to_string(), value.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// The server-issued token pair plus the rest of the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub view_state: String,
    pub event_validation: String,
    pub form_snapshot: FormFields,
}

/// Holds the single live session for a run.
///
/// A token pair is good for exactly one submission. After a request has been
/// sent the pair is spent until [`TokenStore::refresh`] installs the pair from
/// the response; a failed exchange leaves it spent, and the caller has to
/// re-establish the session instead of resubmitting.
#[derive(Debug, Clone)]
pub struct TokenStore {
    token: Option<SessionToken>,
    base_fields: FormFields,
    fresh: bool,
}

impl TokenStore {
    pub fn new(base_fields: FormFields) -> Self {
        Self {
            token: None,
            base_fields,
            fresh: false,
        }
    }

    /// Parse the first token pair out of the session-establishing page.
    pub fn initialize(&mut self, bootstrap_html: &str) -> Result<()> {
        let snapshot = self.base_fields.clone();
        let token = Self::extract(bootstrap_html, snapshot)?;
        debug!("Session initialised, form has {} fields", token.form_snapshot.len());
        self.token = Some(token);
        self.fresh = true;
        Ok(())
    }

    /// Replace the token pair with the one carried by a just-received page.
    pub fn refresh(&mut self, html: &str) -> Result<()> {
        let snapshot = match &self.token {
            Some(t) => t.form_snapshot.clone(),
            None => self.base_fields.clone(),
        };
        let token = Self::extract(html, snapshot)?;
        self.token = Some(token);
        self.fresh = true;
        Ok(())
    }

    /// Full field set with `overrides` merged in, ready to be form-encoded.
    pub fn current_form_payload(&self, overrides: &[(&str, String)]) -> Result<FormFields> {
        let token = self.token.as_ref().ok_or_else(|| {
            FloorsheetError::TokenExtraction("no session has been initialised".to_string())
        })?;
        let mut payload = token.form_snapshot.clone();
        for (name, value) in overrides {
            payload.set(name, value);
        }
        Ok(payload)
    }

    /// Record that the current pair has been submitted.
    pub fn mark_consumed(&mut self) {
        self.fresh = false;
    }

    /// True when a pair exists that has not been submitted yet.
    pub fn is_fresh(&self) -> bool {
        self.token.is_some() && self.fresh
    }

    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    fn extract(html: &str, mut snapshot: FormFields) -> Result<SessionToken> {
        let document = Html::parse_document(html);
        let view_state = hidden_value(&document, VIEW_STATE);
        let event_validation = hidden_value(&document, EVENT_VALIDATION);

        // 两个字段缺一不可
        let (view_state, event_validation) = match (view_state, event_validation) {
            (Some(vs), Some(ev)) if !vs.is_empty() && !ev.is_empty() => (vs, ev),
            (vs, ev) => {
                let missing: Vec<&str> = [(VIEW_STATE, vs), (EVENT_VALIDATION, ev)]
                    .into_iter()
                    .filter(|(_, v)| v.as_deref().map_or(true, str::is_empty))
                    .map(|(name, _)| name)
                    .collect();
                return Err(FloorsheetError::TokenExtraction(format!(
                    "{} missing from page",
                    missing.join(" and ")
                )));
            }
        };

        snapshot.set(VIEW_STATE, &view_state);
        snapshot.set(EVENT_VALIDATION, &event_validation);
        if let Some(generator) = hidden_value(&document, VIEW_STATE_GENERATOR) {
            snapshot.set(VIEW_STATE_GENERATOR, &generator);
        }

        Ok(SessionToken {
            view_state,
            event_validation,
            form_snapshot: snapshot,
        })
    }
}

fn hidden_value(document: &Html, name: &str) -> Option<String> {
    let selector = Selector::parse(&format!("input[name=\"{}\"]", name)).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
}
