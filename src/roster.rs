// Roster construction: turns a ", "-separated name list into indexed contestants.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between entries in roster and vote messages.
pub const SEPARATOR: &str = ", ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("name {0:?} appears more than once")]
    DuplicateName(String),
    #[error("empty name in list")]
    EmptyName,
}

/// What a rich-text span in the roster message points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationKind {
    /// Inline link with an explicit URL.
    Link { url: String },
    /// Inline mention of a user without a public username.
    Mention { user_id: i64 },
}

/// A rich-text span as reported by the transport: the exact text it covers
/// and where it points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub text: String,
    pub kind: AnnotationKind,
}

impl Annotation {
    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: AnnotationKind::Link { url: url.into() },
        }
    }

    pub fn mention(text: impl Into<String>, user_id: i64) -> Self {
        Self {
            text: text.into(),
            kind: AnnotationKind::Mention { user_id },
        }
    }

    pub fn url(&self) -> String {
        match &self.kind {
            AnnotationKind::Link { url } => url.clone(),
            AnnotationKind::Mention { user_id } => format!("tg://user?id={user_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contestant {
    pub name: String,
    pub link: Option<String>,
    pub count: u32,
}

impl Contestant {
    pub fn new(name: impl Into<String>, link: Option<String>) -> Self {
        Self {
            name: name.into(),
            link,
            count: 0,
        }
    }

    /// HTML rendering of the name, wrapped in an anchor when it has a link.
    pub fn label(&self) -> String {
        match &self.link {
            Some(url) => format!(
                "<a href=\"{}\">{}</a>",
                escape_html(url),
                escape_html(&self.name)
            ),
            None => escape_html(&self.name),
        }
    }
}

/// Contestants of one target chat. The position in the roster is the
/// contestant's index; membership never changes after construction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Roster {
    contestants: Vec<Contestant>,
}

impl Roster {
    pub fn from_contestants(contestants: Vec<Contestant>) -> Self {
        Self { contestants }
    }

    pub fn len(&self) -> usize {
        self.contestants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contestants.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Contestant> {
        self.contestants.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Contestant> {
        self.contestants.get_mut(index)
    }

    /// Index of the contestant with exactly this name (case sensitive).
    pub fn position(&self, name: &str) -> Option<usize> {
        self.contestants.iter().position(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contestant> {
        self.contestants.iter()
    }

    /// Registration summary posted to the target chat: `{count}: {name}` per line.
    pub fn summary(&self) -> String {
        self.contestants
            .iter()
            .map(|c| format!("{}: {}\n", c.count, c.label()))
            .collect()
    }

    /// Index list for the controller: `{index}: {name}` per line.
    pub fn index_list(&self) -> String {
        self.contestants
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{i}: {}\n", c.label()))
            .collect()
    }
}

/// Build a roster from the raw message text and its rich-text annotations.
///
/// Entries are compared as raw strings before annotations are applied, so a
/// repeated link text is a duplicate too. Annotated entries are indexed
/// first, in message order, followed by the plain entries in theirs. An
/// annotation that does not cover a whole entry is ignored.
pub fn build_roster(text: &str, annotations: &[Annotation]) -> Result<Roster, RosterError> {
    let entries: Vec<&str> = text.split(SEPARATOR).collect();

    let mut seen = HashSet::with_capacity(entries.len());
    for entry in &entries {
        if entry.is_empty() {
            return Err(RosterError::EmptyName);
        }
        if !seen.insert(*entry) {
            return Err(RosterError::DuplicateName(entry.to_string()));
        }
    }

    let mut links: HashMap<&str, String> = HashMap::with_capacity(annotations.len());
    for annotation in annotations {
        links
            .entry(annotation.text.as_str())
            .or_insert_with(|| annotation.url());
    }

    let (annotated, plain): (Vec<&str>, Vec<&str>) =
        entries.into_iter().partition(|e| links.contains_key(e));

    let contestants = annotated
        .into_iter()
        .map(|name| Contestant::new(name, links.get(name).cloned()))
        .chain(plain.into_iter().map(|name| Contestant::new(name, None)))
        .collect();

    Ok(Roster { contestants })
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
