//! Mission templates and the per-episode `MissionInit` descriptor.
//!
//! The mission's business content is opaque here. Only the handful of
//! elements the session needs are located: `AgentSection` (agent count),
//! `TurnBasedCommands`, each agent's `VideoProducer`, and the slots of the
//! `MissionInit` envelope.

use std::fmt::Write as _;
use std::path::Path;

use malmo_core::error::ConfigError;
use malmo_core::types::FrameGeometry;

use crate::framing::MAX_FRAME_SIZE;
use crate::protocol::{MALMO_VERSION, episode_token};

/// Placeholder in templates for the missions directory.
pub const MISSIONS_DIR_MARKER: &str = "$(MISSIONS_DIR)";

// ---------------------------------------------------------------------------
// Minimal element scanning
// ---------------------------------------------------------------------------

/// An opening tag located in a document.
#[derive(Debug, Clone, Copy)]
struct OpenTag<'a> {
    start: usize,
    /// Index just past the closing `>`.
    end: usize,
    attrs: &'a str,
    self_closing: bool,
}

/// Find the next `<name ...>` at or after `from`. `<MissionInit` does not
/// match `Mission`.
fn find_open_tag<'a>(xml: &'a str, name: &str, from: usize) -> Option<OpenTag<'a>> {
    let pattern = format!("<{name}");
    let mut pos = from;
    while let Some(rel) = xml.get(pos..)?.find(&pattern) {
        let start = pos + rel;
        let after = start + pattern.len();
        match xml[after..].chars().next() {
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => {
                let close = after + xml[after..].find('>')?;
                let self_closing = xml[..close].ends_with('/');
                return Some(OpenTag {
                    start,
                    end: close + 1,
                    attrs: xml[after..close].trim_end_matches('/'),
                    self_closing,
                });
            }
            _ => pos = after,
        }
    }
    None
}

/// An element's attribute text and body.
#[derive(Debug, Clone, Copy)]
struct Element<'a> {
    attrs: &'a str,
    body: &'a str,
}

/// Every `name` element in document order. Same-name nesting is not
/// supported.
fn elements<'a>(xml: &'a str, name: &str) -> Vec<Element<'a>> {
    let closing = format!("</{name}>");
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(tag) = find_open_tag(xml, name, pos) {
        if tag.self_closing {
            found.push(Element {
                attrs: tag.attrs,
                body: "",
            });
            pos = tag.end;
            continue;
        }
        let Some(rel) = xml[tag.end..].find(&closing) else {
            break;
        };
        found.push(Element {
            attrs: tag.attrs,
            body: &xml[tag.end..tag.end + rel],
        });
        pos = tag.end + rel + closing.len();
    }
    found
}

/// Trimmed text of the first `name` child in `body`.
fn element_text<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    elements(body, name).first().map(|e| e.body.trim())
}

/// Value of attribute `name` in an opening tag's attribute text.
fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = attrs;
    while let Some(i) = rest.find(name) {
        let boundary = rest[..i].chars().next_back().is_none_or(char::is_whitespace);
        let tail = &rest[i + name.len()..];
        if boundary {
            if let Some(value) = tail.trim_start().strip_prefix('=') {
                let value = value.trim_start();
                let quote = value.chars().next()?;
                if quote == '"' || quote == '\'' {
                    let value = &value[1..];
                    return value.find(quote).map(|end| &value[..end]);
                }
            }
        }
        rest = tail;
    }
    None
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// MissionTemplate
// ---------------------------------------------------------------------------

/// A mission document starting at its `<Mission` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionTemplate {
    xml: String,
}

impl MissionTemplate {
    /// Substitute the missions directory and drop any preamble (XML
    /// declaration, comments) before the `<Mission` element.
    pub fn parse(text: &str, missions_dir: &Path) -> Result<Self, ConfigError> {
        let text = text.replace(MISSIONS_DIR_MARKER, &missions_dir.to_string_lossy());
        let tag = find_open_tag(&text, "Mission", 0).ok_or(ConfigError::MissingMissionElement)?;
        Ok(Self {
            xml: text[tag.start..].trim_end().to_owned(),
        })
    }

    pub fn load(path: &Path, missions_dir: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, missions_dir)
    }

    pub fn as_str(&self) -> &str {
        &self.xml
    }

    /// Number of `AgentSection` elements, at least one.
    pub fn agent_count(&self) -> usize {
        let mut count = 0;
        let mut pos = 0;
        while let Some(tag) = find_open_tag(&self.xml, "AgentSection", pos) {
            count += 1;
            pos = tag.end;
        }
        count.max(1)
    }

    /// Whether agents take turns (`TurnBasedCommands` present).
    pub fn is_turn_based(&self) -> bool {
        find_open_tag(&self.xml, "TurnBasedCommands", 0).is_some()
    }

    /// Frame geometry from the `VideoProducer` of agent `role`.
    ///
    /// Every agent must declare exactly one `VideoProducer`. Depth is 4 when
    /// `want_depth` is `true` or `1`, otherwise 3. Frames larger than
    /// [`MAX_FRAME_SIZE`] are rejected.
    pub fn frame_geometry(&self, role: u32) -> Result<FrameGeometry, ConfigError> {
        let producers = elements(&self.xml, "VideoProducer");
        let expected = self.agent_count();
        if producers.len() != expected {
            return Err(ConfigError::VideoProducerCount {
                expected,
                found: producers.len(),
            });
        }
        let producer = producers
            .get(role as usize)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "role".into(),
                message: format!("{role} out of range for {expected} agents"),
            })?;

        let dimension = |name: &str| -> Result<u32, ConfigError> {
            let text = element_text(producer.body, name)
                .ok_or_else(|| ConfigError::MissingField(format!("VideoProducer.{name}")))?;
            text.parse().map_err(|_| ConfigError::InvalidValue {
                field: format!("VideoProducer.{name}"),
                message: text.to_owned(),
            })
        };
        let width = dimension("Width")?;
        let height = dimension("Height")?;
        let depth: u32 = match attribute(producer.attrs, "want_depth") {
            Some("true" | "1") => 4,
            _ => 3,
        };
        let bytes = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(depth as usize));
        if bytes.is_none_or(|n| n > MAX_FRAME_SIZE) {
            return Err(ConfigError::InvalidValue {
                field: "VideoProducer".into(),
                message: format!("{width}x{height}x{depth} frame exceeds {MAX_FRAME_SIZE} bytes"),
            });
        }
        Ok(FrameGeometry::new(width, height, depth))
    }
}

// ---------------------------------------------------------------------------
// EpisodeDescriptor
// ---------------------------------------------------------------------------

fn envelope() -> String {
    format!(
        concat!(
            r#"<MissionInit xmlns="http://ProjectMalmo.microsoft.com" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"SchemaVersion="" PlatformVersion="{version}">"#,
            "<ExperimentUID></ExperimentUID>",
            "<ClientRole>0</ClientRole>",
            "<ClientAgentConnection>",
            "<ClientIPAddress>127.0.0.1</ClientIPAddress>",
            "<ClientMissionControlPort>0</ClientMissionControlPort>",
            "<ClientCommandsPort>0</ClientCommandsPort>",
            "<AgentIPAddress>127.0.0.1</AgentIPAddress>",
            "<AgentMissionControlPort>0</AgentMissionControlPort>",
            "<AgentVideoPort>0</AgentVideoPort>",
            "<AgentDepthPort>0</AgentDepthPort>",
            "<AgentLuminancePort>0</AgentLuminancePort>",
            "<AgentObservationsPort>0</AgentObservationsPort>",
            "<AgentRewardsPort>0</AgentRewardsPort>",
            "<AgentColourMapPort>0</AgentColourMapPort>",
            "</ClientAgentConnection>",
            "</MissionInit>",
        ),
        version = MALMO_VERSION
    )
}

/// Replace the text of slot `name` in `doc`. Returns the index just past the
/// slot's closing tag.
fn fill_slot(doc: &mut String, name: &str, value: &str) -> Result<usize, ConfigError> {
    let missing = || ConfigError::MissingSlot(name.to_owned());
    let start = find_open_tag(doc, name, 0).ok_or_else(missing)?.end;
    let closing = format!("</{name}>");
    let rel = doc[start..].find(&closing).ok_or_else(missing)?;
    let value = escape(value);
    doc.replace_range(start..start + rel, &value);
    Ok(start + value.len() + closing.len())
}

/// Address of the integrated server a non-primary agent joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConnection {
    pub address: String,
    pub port: u32,
}

/// `MissionInit` document for one episode of one agent.
///
/// Built fresh for every reset. The only later mutation is the server port
/// of a non-primary agent, filled once the head node reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeDescriptor {
    /// Document up to and including `</ExperimentUID>`.
    head: String,
    tail: String,
    server: Option<ServerConnection>,
    experiment_id: String,
    role: u32,
    resets: u64,
}

/// Build the descriptor for episode `resets` of agent `role`.
pub fn build(
    template: &MissionTemplate,
    role: u32,
    experiment_id: &str,
    resets: u64,
) -> Result<EpisodeDescriptor, ConfigError> {
    let mut doc = envelope();
    let body = find_open_tag(&doc, "MissionInit", 0)
        .ok_or_else(|| ConfigError::MissingSlot("MissionInit".into()))?
        .end;
    doc.insert_str(body, template.as_str());

    fill_slot(&mut doc, "ClientRole", &role.to_string())?;
    let split = fill_slot(&mut doc, "ExperimentUID", experiment_id)?;

    let server = (role != 0 && template.agent_count() > 1).then(|| ServerConnection {
        address: String::new(),
        port: 0,
    });
    let tail = doc.split_off(split);
    Ok(EpisodeDescriptor {
        head: doc,
        tail,
        server,
        experiment_id: experiment_id.to_owned(),
        role,
        resets,
    })
}

impl EpisodeDescriptor {
    pub fn role(&self) -> u32 {
        self.role
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// `experimentId:role:resets` of this episode.
    pub fn token(&self) -> String {
        episode_token(&self.experiment_id, self.role, self.resets)
    }

    /// Whether the descriptor carries a `MinecraftServerConnection` slot.
    pub fn needs_server(&self) -> bool {
        self.server.is_some()
    }

    pub fn server_connection(&self) -> Option<&ServerConnection> {
        self.server.as_ref()
    }

    /// Fill the server slot. Ignored for descriptors without one.
    pub fn set_server_connection(&mut self, address: &str, port: u32) {
        if let Some(server) = self.server.as_mut() {
            address.clone_into(&mut server.address);
            server.port = port;
        }
    }

    pub fn to_xml(&self) -> String {
        let mut xml = self.head.clone();
        if let Some(server) = &self.server {
            let _ = write!(
                xml,
                r#"<MinecraftServerConnection address="{}" port="{}"/>"#,
                escape(&server.address),
                server.port
            );
        }
        xml.push_str(&self.tail);
        xml
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
