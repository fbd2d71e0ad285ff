//! Narrator: owns a scene, routes multi-party messages to one character.
//!
//! Responder selection, first rule that applies wins:
//!
//! | situation                              | responder                     | confidence |
//! |----------------------------------------|-------------------------------|-----------:|
//! | nobody present                         | `NoAgentsPresent` error       |          – |
//! | exactly one present                    | that one                      |        1.0 |
//! | message names a present character      | first named, presence order   |        0.9 |
//! | another generative call is running     | random, not the last speaker  |        0.5 |
//! | completion service names a character   | that one                      |        0.8 |
//! | completion service names nobody        | random, not the last speaker  |        0.6 |
//! | completion service fails               | random, not the last speaker  |        0.4 |
//!
//! Generative calls (routing, narration, suggestion) share one busy flag per
//! narrator. Narration and suggestion never queue behind it; they return a
//! placeholder or [`SuggestionTicket::Busy`] instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use chorus_core::{Clock, Persona, TimeOfDay};
use chorus_llm::{ChatMessage, PromptId};

use crate::character::{CharacterServices, TalkOptions};
use crate::error::{Result, SceneError};
use crate::pool::SharedCharacter;
use crate::suggestion::{SuggestionBoard, SuggestionStatus, SuggestionTicket};

/// Returned by [`Narrator::direct_scene`] while another generative call runs.
pub const BUSY_PLACEHOLDER: &str =
    "The narrator is still working on the previous request. Try again in a moment.";

const HELP_TEXT: &str = "Stage commands:
/scene <description>   change the scene
/add <name>            bring a character into the scene
/remove <name>         send a character away
/time next|previous    move the clock one part of the day
/day next|previous     move the clock one day
/characters            list who is here
/help                  this message";

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// How a responder was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    /// Only one character was present.
    Sole,
    /// The message named the character.
    Mentioned,
    /// The completion service named the character.
    Service,
    /// The completion service answered with no present name.
    Unmatched,
    /// Another generative call held the busy flag.
    Contended,
    /// The completion service failed.
    ServiceFailed,
}

impl RoutingMethod {
    /// Heuristic score for this method.
    #[must_use]
    pub fn confidence(self) -> f32 {
        match self {
            Self::Sole => 1.0,
            Self::Mentioned => 0.9,
            Self::Service => 0.8,
            Self::Unmatched => 0.6,
            Self::Contended => 0.5,
            Self::ServiceFailed => 0.4,
        }
    }
}

/// Chosen responder plus how it was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Character that answers.
    pub name: String,
    /// Heuristic score, not a probability.
    pub confidence: f32,
    /// Which rule picked the character.
    pub method: RoutingMethod,
}

impl RoutingDecision {
    fn new(name: impl Into<String>, method: RoutingMethod) -> Self {
        Self {
            name: name.into(),
            confidence: method.confidence(),
            method,
        }
    }
}

// ---------------------------------------------------------------------------
// Replies, snapshots, summaries
// ---------------------------------------------------------------------------

/// Who produced a [`NarratorReply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Speaker {
    /// Scene narration or stage-direction acknowledgment.
    Narrator,
    /// Help text, listings, usage errors.
    System,
    /// A character's reply.
    Character(String),
}

/// Result of [`Narrator::process_message`] and [`Narrator::direct_scene`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarratorReply {
    /// Who is speaking.
    pub speaker: Speaker,
    /// Reply text.
    pub text: String,
    /// Present when a character was routed to.
    pub routing: Option<RoutingDecision>,
    /// Scene clock after the message.
    pub clock: Clock,
}

/// Serializable snapshot of a narrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarratorRecord {
    /// Registry key.
    pub id: String,
    /// Scene label.
    pub scene: String,
    /// Scene clock.
    pub clock: Clock,
    /// Owned characters, in join order.
    pub characters: Vec<String>,
    /// Characters in the scene, in presence order.
    pub present: Vec<String>,
    /// Narration so far.
    #[serde(default)]
    pub plot_points: Vec<String>,
    /// Last character routed to.
    #[serde(default)]
    pub last_responder: Option<String>,
    /// Shared user persona.
    pub user: Persona,
}

/// One line of a narrator listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarratorSummary {
    /// Registry key.
    pub id: String,
    /// Scene label.
    pub scene: String,
    /// Scene day.
    pub day: u32,
    /// Scene segment.
    pub time_of_day: TimeOfDay,
    /// Characters in the scene.
    pub characters: Vec<String>,
    /// `true` for the registry's active narrator.
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Narrator
// ---------------------------------------------------------------------------

struct SceneState {
    scene: String,
    cast: Vec<(String, SharedCharacter)>,
    present: Vec<String>,
    plot_points: Vec<String>,
    clock: Clock,
    last_responder: Option<String>,
    user: Persona,
}

impl SceneState {
    fn handle(&self, name: &str) -> Option<SharedCharacter> {
        self.cast
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, h)| Arc::clone(h))
    }

    fn present_handles(&self) -> Vec<SharedCharacter> {
        self.present.iter().filter_map(|n| self.handle(n)).collect()
    }

    fn plot_text(&self) -> String {
        if self.plot_points.is_empty() {
            "(none yet)".to_string()
        } else {
            self.plot_points.join("\n")
        }
    }

    fn cast_names(&self) -> Vec<String> {
        self.cast.iter().map(|(n, _)| n.clone()).collect()
    }
}

/// Non-blocking busy flag. Holding a [`BusyPermit`] marks the narrator busy.
#[derive(Debug, Default)]
struct BusyGate {
    held: Arc<AtomicBool>,
}

impl BusyGate {
    fn try_enter(&self) -> Option<BusyPermit> {
        (!self.held.swap(true, Ordering::AcqRel)).then(|| BusyPermit {
            held: Arc::clone(&self.held),
        })
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Clears the flag on drop; movable into spawned tasks.
#[derive(Debug)]
struct BusyPermit {
    held: Arc<AtomicBool>,
}

impl Drop for BusyPermit {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

/// A scene with its own clock, cast and routing policy.
pub struct Narrator {
    id: String,
    state: RwLock<SceneState>,
    busy: BusyGate,
    rng: parking_lot::Mutex<StdRng>,
    services: CharacterServices,
    suggestions: SuggestionBoard,
}

impl std::fmt::Debug for Narrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Narrator")
            .field("id", &self.id)
            .field("scene", &state.scene)
            .field("clock", &state.clock)
            .field("present", &state.present)
            .finish_non_exhaustive()
    }
}

async fn sync_clocks(handles: &[SharedCharacter], clock: Clock) {
    for handle in handles {
        handle.lock().await.sync_clock(clock);
    }
}

impl Narrator {
    /// An empty scene at `clock`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        scene: impl Into<String>,
        clock: Clock,
        user: Persona,
        services: CharacterServices,
    ) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(SceneState {
                scene: scene.into(),
                cast: Vec::new(),
                present: Vec::new(),
                plot_points: Vec::new(),
                clock,
                last_responder: None,
                user,
            }),
            busy: BusyGate::default(),
            rng: parking_lot::Mutex::new(StdRng::from_entropy()),
            services,
            suggestions: SuggestionBoard::new(),
        }
    }

    /// Seed the fallback-routing generator.
    #[must_use]
    pub fn with_rng_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// Rebuild from a snapshot. `lookup` resolves character names to handles;
    /// names it cannot resolve are dropped with a warning.
    pub fn from_record(
        record: NarratorRecord,
        services: CharacterServices,
        lookup: impl Fn(&str) -> Option<SharedCharacter>,
    ) -> Self {
        let mut cast = Vec::with_capacity(record.characters.len());
        for name in record.characters {
            match lookup(&name) {
                Some(handle) => cast.push((name, handle)),
                None => warn!(narrator = %record.id, character = %name, "Dropping unknown character from snapshot"),
            }
        }
        let owned = |n: &String| cast.iter().any(|(c, _)| c == n);
        let present = record.present.into_iter().filter(|n| owned(n)).collect();
        let last_responder = record.last_responder.filter(|n| owned(n));

        let narrator = Self::new(record.id, record.scene, record.clock, record.user, services);
        {
            let mut state = narrator.state.write();
            state.cast = cast;
            state.present = present;
            state.plot_points = record.plot_points;
            state.last_responder = last_responder;
        }
        narrator
    }

    /// Snapshot for persistence.
    #[must_use]
    pub fn to_record(&self) -> NarratorRecord {
        let state = self.state.read();
        NarratorRecord {
            id: self.id.clone(),
            scene: state.scene.clone(),
            clock: state.clock,
            characters: state.cast_names(),
            present: state.present.clone(),
            plot_points: state.plot_points.clone(),
            last_responder: state.last_responder.clone(),
            user: state.user.clone(),
        }
    }

    /// Listing entry.
    #[must_use]
    pub fn summary(&self, is_active: bool) -> NarratorSummary {
        let state = self.state.read();
        NarratorSummary {
            id: self.id.clone(),
            scene: state.scene.clone(),
            day: state.clock.day(),
            time_of_day: state.clock.time_of_day(),
            characters: state.present.clone(),
            is_active,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Registry key.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Scene label.
    #[must_use]
    pub fn scene(&self) -> String {
        self.state.read().scene.clone()
    }

    /// Scene clock.
    #[must_use]
    pub fn clock(&self) -> Clock {
        self.state.read().clock
    }

    /// Characters in the scene, in presence order.
    #[must_use]
    pub fn present(&self) -> Vec<String> {
        self.state.read().present.clone()
    }

    /// Every character this narrator owns.
    #[must_use]
    pub fn characters(&self) -> Vec<String> {
        self.state.read().cast_names()
    }

    /// `true` if `name` is owned by this narrator.
    #[must_use]
    pub fn has_character(&self, name: &str) -> bool {
        self.state.read().cast.iter().any(|(n, _)| n == name)
    }

    /// Narration so far.
    #[must_use]
    pub fn plot_points(&self) -> Vec<String> {
        self.state.read().plot_points.clone()
    }

    /// Last character routed to.
    #[must_use]
    pub fn last_responder(&self) -> Option<String> {
        self.state.read().last_responder.clone()
    }

    /// Shared user persona.
    #[must_use]
    pub fn user(&self) -> Persona {
        self.state.read().user.clone()
    }

    /// `true` while a generative call is running. Never blocks or contends.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.is_held()
    }

    // ------------------------------------------------------------------
    // Cast and scene
    // ------------------------------------------------------------------

    /// Take ownership of a character: its clock and user persona are synced
    /// to the scene and it joins unless already present.
    pub async fn add_character(&self, handle: SharedCharacter) {
        let (clock, user) = {
            let state = self.state.read();
            (state.clock, state.user.clone())
        };
        let name = {
            let mut character = handle.lock().await;
            character.sync_clock(clock);
            character.set_user_persona(user);
            character.name().to_string()
        };

        let mut state = self.state.write();
        if let Some(slot) = state.cast.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = handle;
        } else {
            state.cast.push((name.clone(), handle));
        }
        if !state.present.contains(&name) {
            state.present.push(name.clone());
        }
        info!(narrator = %self.id, character = %name, "Character joined");
    }

    /// Forget a character entirely. Returns `false` if it was not owned.
    pub fn detach_character(&self, name: &str) -> bool {
        let mut state = self.state.write();
        let before = state.cast.len();
        state.cast.retain(|(n, _)| n != name);
        state.present.retain(|n| n != name);
        if state.last_responder.as_deref() == Some(name) {
            state.last_responder = None;
        }
        before != state.cast.len()
    }

    /// Bring an owned character into the scene.
    ///
    /// # Errors
    /// Returns [`SceneError::AgentNotFound`] if the narrator does not own it.
    pub async fn join(&self, name: &str) -> Result<()> {
        let (handle, clock) = {
            let mut state = self.state.write();
            let handle = state
                .handle(name)
                .ok_or_else(|| SceneError::AgentNotFound(name.to_string()))?;
            if !state.present.iter().any(|n| n == name) {
                state.present.push(name.to_string());
            }
            (handle, state.clock)
        };
        handle.lock().await.sync_clock(clock);
        Ok(())
    }

    /// Send a present character away; it stays owned.
    ///
    /// # Errors
    /// Returns [`SceneError::AgentNotFound`] if it is not present.
    pub fn leave(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        let before = state.present.len();
        state.present.retain(|n| n != name);
        if before == state.present.len() {
            return Err(SceneError::AgentNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Change the scene label and optionally replace who is present.
    ///
    /// Every name must be owned; nothing changes otherwise.
    ///
    /// # Errors
    /// Returns [`SceneError::AgentNotFound`] for the first unknown name.
    pub async fn set_scene(&self, label: &str, present: Option<Vec<String>>) -> Result<()> {
        let (joiners, clock) = {
            let mut state = self.state.write();
            let joiners = match present {
                Some(names) => {
                    let mut ordered: Vec<String> = Vec::with_capacity(names.len());
                    for name in names {
                        if state.handle(&name).is_none() {
                            return Err(SceneError::AgentNotFound(name));
                        }
                        if !ordered.contains(&name) {
                            ordered.push(name);
                        }
                    }
                    let joiners: Vec<SharedCharacter> = ordered
                        .iter()
                        .filter(|n| !state.present.contains(n))
                        .filter_map(|n| state.handle(n))
                        .collect();
                    state.present = ordered;
                    joiners
                }
                None => Vec::new(),
            };
            state.scene = label.to_string();
            (joiners, state.clock)
        };
        sync_clocks(&joiners, clock).await;
        info!(narrator = %self.id, scene = %label, "Scene changed");
        Ok(())
    }

    /// Replace the user persona here and on every owned character.
    pub async fn set_user_persona(&self, persona: Persona) {
        let handles: Vec<SharedCharacter> = {
            let mut state = self.state.write();
            state.user = persona.clone();
            state.cast.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for handle in handles {
            handle.lock().await.set_user_persona(persona.clone());
        }
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    async fn move_clock(&self, step: impl FnOnce(&mut Clock)) -> Clock {
        let (clock, handles) = {
            let mut state = self.state.write();
            step(&mut state.clock);
            (state.clock, state.present_handles())
        };
        sync_clocks(&handles, clock).await;
        debug!(narrator = %self.id, clock = %clock, "Scene clock moved");
        clock
    }

    /// Next part of the day; present characters follow.
    pub async fn advance(&self) -> Clock {
        self.move_clock(|c| {
            c.advance();
        })
        .await
    }

    /// Previous part of the day, clamped at day 1; present characters follow.
    pub async fn retreat(&self) -> Clock {
        self.move_clock(Clock::retreat).await
    }

    /// Early morning of the next day.
    pub async fn next_day(&self) -> Clock {
        self.move_clock(Clock::next_day).await
    }

    /// Early morning of the previous day; no-op on day 1.
    pub async fn previous_day(&self) -> Clock {
        self.move_clock(Clock::previous_day).await
    }

    /// Set the scene clock from untrusted input.
    ///
    /// # Errors
    /// Returns [`chorus_core::ChorusError::InvalidTimeValue`]; nothing changes.
    pub async fn set_time(&self, day: u32, time_of_day: &str) -> Result<Clock> {
        let mut next = self.clock();
        next.set(day, time_of_day)?;
        Ok(self.move_clock(|c| *c = next).await)
    }

    // ------------------------------------------------------------------
    // Routing and turns
    // ------------------------------------------------------------------

    fn pick_fallback(&self, present: &[String], last: Option<&str>) -> Result<String> {
        let candidates: Vec<&String> = if present.len() > 1 {
            present.iter().filter(|n| Some(n.as_str()) != last).collect()
        } else {
            present.iter().collect()
        };
        let mut rng = self.rng.lock();
        candidates
            .choose(&mut *rng)
            .map(|n| (*n).clone())
            .ok_or(SceneError::NoAgentsPresent)
    }

    /// Pick the character that answers `message`.
    ///
    /// # Errors
    /// Returns [`SceneError::NoAgentsPresent`] for an empty scene. Service
    /// failures fall back to a random pick instead of erroring.
    pub async fn select_responder(&self, message: &str) -> Result<RoutingDecision> {
        let (present, last, scene, plot, user_name) = {
            let state = self.state.read();
            (
                state.present.clone(),
                state.last_responder.clone(),
                state.scene.clone(),
                state.plot_text(),
                state.user.name.clone(),
            )
        };

        match present.as_slice() {
            [] => return Err(SceneError::NoAgentsPresent),
            [only] => return Ok(RoutingDecision::new(only.clone(), RoutingMethod::Sole)),
            _ => {}
        }

        let lowered = message.to_lowercase();
        if let Some(name) = present.iter().find(|n| lowered.contains(&n.to_lowercase())) {
            return Ok(RoutingDecision::new(name.clone(), RoutingMethod::Mentioned));
        }

        let Some(permit) = self.busy.try_enter() else {
            debug!(narrator = %self.id, "Routing contended, picking at random");
            let name = self.pick_fallback(&present, last.as_deref())?;
            return Ok(RoutingDecision::new(name, RoutingMethod::Contended));
        };

        let characters = present.join(", ");
        let rendered = self.services.prompts.render(
            PromptId::ResponderSelection,
            &[
                ("scene", &scene),
                ("characters", &characters),
                ("plot_points", &plot),
                ("user_name", &user_name),
                ("message", message),
            ],
        )?;
        let context = [
            ChatMessage::system(rendered.system),
            ChatMessage::user(rendered.user),
        ];
        let answer = self.services.llm.complete(&context, &rendered.options).await;
        drop(permit);

        let decision = match answer {
            Ok(response) => {
                let answer = response.text.to_lowercase();
                match present.iter().find(|n| answer.contains(&n.to_lowercase())) {
                    Some(name) => RoutingDecision::new(name.clone(), RoutingMethod::Service),
                    None => RoutingDecision::new(
                        self.pick_fallback(&present, last.as_deref())?,
                        RoutingMethod::Unmatched,
                    ),
                }
            }
            Err(e) => {
                warn!(narrator = %self.id, error = %e, "Routing call failed, picking at random");
                RoutingDecision::new(
                    self.pick_fallback(&present, last.as_deref())?,
                    RoutingMethod::ServiceFailed,
                )
            }
        };
        Ok(decision)
    }

    /// Handle one message addressed to the scene.
    ///
    /// Slash-prefixed input is a stage direction handled here; anything else
    /// is routed to one present character. If the reply moved that
    /// character's clock, the scene and the other present characters follow.
    ///
    /// # Errors
    /// Routing and turn errors from [`Narrator::select_responder`] and
    /// [`crate::Character::talk`].
    pub async fn process_message(
        &self,
        message: &str,
        time_since_last: Option<String>,
    ) -> Result<NarratorReply> {
        if message.trim_start().starts_with('/') {
            return self.stage_direction(message).await;
        }

        let decision = self.select_responder(message).await?;
        let (handle, clock) = {
            let state = self.state.read();
            let handle = state
                .handle(&decision.name)
                .ok_or_else(|| SceneError::AgentNotFound(decision.name.clone()))?;
            (handle, state.clock)
        };
        info!(
            narrator = %self.id,
            responder = %decision.name,
            confidence = decision.confidence,
            method = ?decision.method,
            "Routed message"
        );

        let reply = {
            let mut character = handle.lock().await;
            character.sync_clock(clock);
            character
                .talk(
                    message,
                    TalkOptions {
                        time_since_last,
                        auto_advance: false,
                    },
                )
                .await?
        };

        let others: Vec<SharedCharacter> = {
            let mut state = self.state.write();
            state.last_responder = Some(decision.name.clone());
            if reply.time_changes > 0 {
                state.clock = reply.clock;
                state
                    .present
                    .iter()
                    .filter(|n| **n != decision.name)
                    .filter_map(|n| state.handle(n))
                    .collect()
            } else {
                Vec::new()
            }
        };
        sync_clocks(&others, reply.clock).await;

        Ok(NarratorReply {
            speaker: Speaker::Character(decision.name.clone()),
            text: reply.text,
            routing: Some(decision),
            clock: self.clock(),
        })
    }

    fn reply(&self, speaker: Speaker, text: impl Into<String>) -> NarratorReply {
        NarratorReply {
            speaker,
            text: text.into(),
            routing: None,
            clock: self.clock(),
        }
    }

    async fn stage_direction(&self, input: &str) -> Result<NarratorReply> {
        let trimmed = input.trim();
        let (command, rest) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(c, r)| (c, r.trim()));
        let argument = rest.to_ascii_lowercase();

        let reply = match (command.to_ascii_lowercase().as_str(), argument.as_str()) {
            ("/scene", "") => self.reply(Speaker::System, "Usage: /scene <description>"),
            ("/scene", _) => {
                self.state.write().scene = rest.to_string();
                self.reply(Speaker::Narrator, format!("The scene shifts: {rest}."))
            }
            ("/add", "") => self.reply(Speaker::System, "Usage: /add <name>"),
            ("/add", _) => {
                self.join(rest).await?;
                self.reply(Speaker::Narrator, format!("{rest} enters the scene."))
            }
            ("/remove", "") => self.reply(Speaker::System, "Usage: /remove <name>"),
            ("/remove", _) => {
                self.leave(rest)?;
                self.reply(Speaker::Narrator, format!("{rest} leaves the scene."))
            }
            ("/time", "next") => {
                let clock = self.advance().await;
                self.reply(Speaker::Narrator, format!("Time moves on: {clock}."))
            }
            ("/time", "previous" | "prev") => {
                let clock = self.retreat().await;
                self.reply(Speaker::Narrator, format!("Time rewinds: {clock}."))
            }
            ("/time", _) => self.reply(Speaker::System, "Usage: /time next | /time previous"),
            ("/day", "next") => {
                let clock = self.next_day().await;
                self.reply(Speaker::Narrator, format!("A new day begins: {clock}."))
            }
            ("/day", "previous" | "prev") => {
                let clock = self.previous_day().await;
                self.reply(Speaker::Narrator, format!("Time rewinds: {clock}."))
            }
            ("/day", _) => self.reply(Speaker::System, "Usage: /day next | /day previous"),
            ("/characters", _) => {
                let (present, absent) = {
                    let state = self.state.read();
                    let absent: Vec<String> = state
                        .cast_names()
                        .into_iter()
                        .filter(|n| !state.present.contains(n))
                        .collect();
                    (state.present.clone(), absent)
                };
                let list = |names: &[String]| {
                    if names.is_empty() {
                        "nobody".to_string()
                    } else {
                        names.join(", ")
                    }
                };
                self.reply(
                    Speaker::System,
                    format!("Present: {}. Elsewhere: {}.", list(&present), list(&absent)),
                )
            }
            ("/help", _) => self.reply(Speaker::System, HELP_TEXT),
            _ => self.reply(
                Speaker::System,
                format!("Unknown command: {command}. Type /help for a list of commands."),
            ),
        };
        Ok(reply)
    }

    // ------------------------------------------------------------------
    // Narration and suggestions
    // ------------------------------------------------------------------

    /// Narrate the next beat from `direction`; non-empty narration is
    /// appended to the plot points. Returns [`BUSY_PLACEHOLDER`] at once if
    /// another generative call is running.
    ///
    /// # Errors
    /// Returns [`SceneError::CompletionService`]; plot points are unchanged.
    pub async fn direct_scene(&self, direction: &str) -> Result<NarratorReply> {
        let Some(_permit) = self.busy.try_enter() else {
            debug!(narrator = %self.id, "Narration requested while busy");
            return Ok(self.reply(Speaker::Narrator, BUSY_PLACEHOLDER));
        };

        let (scene, clock, characters, plot) = {
            let state = self.state.read();
            (
                state.scene.clone(),
                state.clock,
                state.present.join(", "),
                state.plot_text(),
            )
        };
        let day = clock.day().to_string();
        let time_of_day = clock.time_of_day().to_string();
        let rendered = self.services.prompts.render(
            PromptId::SceneNarration,
            &[
                ("scene", &scene),
                ("day", &day),
                ("time_of_day", &time_of_day),
                ("characters", &characters),
                ("plot_points", &plot),
                ("direction", direction),
            ],
        )?;
        let context = [
            ChatMessage::system(rendered.system),
            ChatMessage::user(rendered.user),
        ];
        let response = self.services.llm.complete(&context, &rendered.options).await?;

        let narration = response.text.trim().to_string();
        if !narration.is_empty() {
            self.state.write().plot_points.push(narration.clone());
        }
        Ok(self.reply(Speaker::Narrator, narration))
    }

    /// Start generating a new character idea in the background.
    ///
    /// # Errors
    /// Returns a prompt error if the suggestion template cannot render.
    pub fn suggest_character(&self, request: &str) -> Result<SuggestionTicket> {
        let Some(permit) = self.busy.try_enter() else {
            debug!(narrator = %self.id, "Suggestion requested while busy");
            return Ok(SuggestionTicket::Busy);
        };

        let (scene, characters) = {
            let state = self.state.read();
            (state.scene.clone(), state.cast_names().join(", "))
        };
        let rendered = self.services.prompts.render(
            PromptId::CharacterSuggestion,
            &[
                ("scene", &scene),
                ("characters", &characters),
                ("request", request),
            ],
        )?;
        let context = vec![
            ChatMessage::system(rendered.system),
            ChatMessage::user(rendered.user),
        ];
        let options = rendered.options;
        let llm = Arc::clone(&self.services.llm);
        let (id, tx) = self.suggestions.open();
        let narrator = self.id.clone();

        tokio::spawn(async move {
            let status = match llm.complete(&context, &options).await {
                Ok(response) if !response.is_empty() => {
                    SuggestionStatus::Ready(response.text.trim().to_string())
                }
                Ok(_) => SuggestionStatus::Failed("no suggestion was produced".to_string()),
                Err(e) => {
                    warn!(narrator = %narrator, %id, error = %e, "Character suggestion failed");
                    SuggestionStatus::Failed(e.to_string())
                }
            };
            drop(permit);
            tx.send_replace(status);
        });

        info!(narrator = %self.id, %id, "Character suggestion started");
        Ok(SuggestionTicket::Pending { id })
    }

    /// Current status of a suggestion, `None` for an id this narrator never
    /// issued or whose result was already claimed.
    #[must_use]
    pub fn suggestion(&self, id: Uuid) -> Option<SuggestionStatus> {
        self.suggestions.status(id)
    }

    /// `true` if `id` is running or finished but unclaimed on this narrator.
    #[must_use]
    pub fn owns_suggestion(&self, id: Uuid) -> bool {
        self.suggestions.contains(id)
    }

    /// Wait for a suggestion to finish and claim its result.
    pub async fn wait_for_suggestion(&self, id: Uuid) -> Option<SuggestionStatus> {
        self.suggestions.wait(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::{Character, CharacterProfile, CharacterSettings};
    use chorus_core::embedding::HashingEmbeddingProvider;
    use chorus_core::memory::VectorIndexProvider;
    use chorus_llm::{PromptEngine, ScriptedCompletion};
    use tokio::sync::Mutex;

    fn services(llm: &Arc<ScriptedCompletion>) -> CharacterServices {
        CharacterServices {
            llm: Arc::clone(llm) as _,
            prompts: Arc::new(PromptEngine::builtin()),
            indexes: Arc::new(VectorIndexProvider::new(Arc::new(
                HashingEmbeddingProvider::default(),
            ))),
        }
    }

    fn handle(name: &str, services: &CharacterServices) -> SharedCharacter {
        let character = Character::new(
            CharacterProfile::new(name, "test"),
            &CharacterSettings::default(),
            services.clone(),
        )
        .expect("character");
        Arc::new(Mutex::new(character))
    }

    async fn scene(llm: &Arc<ScriptedCompletion>, names: &[&str]) -> Narrator {
        let services = services(llm);
        let narrator = Narrator::new(
            "test",
            "forest clearing",
            Clock::default(),
            Persona::default(),
            services.clone(),
        )
        .with_rng_seed(7);
        for name in names {
            narrator.add_character(handle(name, &services)).await;
        }
        narrator
    }

    #[tokio::test]
    async fn mention_wins_over_service() {
        let llm = Arc::new(ScriptedCompletion::new());
        let narrator = scene(&llm, &["Lyra", "Kael"]).await;
        let decision = narrator.select_responder("Hey Kael, look at this").await.expect("route");
        assert_eq!(decision, RoutingDecision::new("Kael", RoutingMethod::Mentioned));
        assert!((decision.confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn service_answer_and_fallbacks() {
        let llm = Arc::new(ScriptedCompletion::new());
        llm.push_reply("Kael.").push_reply("the innkeeper").push_failure("down");
        let narrator = scene(&llm, &["Lyra", "Kael"]).await;

        let d = narrator.select_responder("who lit the fire?").await.expect("route");
        assert_eq!((d.name.as_str(), d.method), ("Kael", RoutingMethod::Service));

        let d = narrator.select_responder("who lit the fire?").await.expect("route");
        assert_eq!(d.method, RoutingMethod::Unmatched);
        assert!((d.confidence - 0.6).abs() < f32::EPSILON);

        let d = narrator.select_responder("who lit the fire?").await.expect("route");
        assert_eq!(d.method, RoutingMethod::ServiceFailed);
        assert!((d.confidence - 0.4).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn fallback_avoids_last_responder() {
        let llm = Arc::new(ScriptedCompletion::new().with_default("nobody"));
        let narrator = scene(&llm, &["Lyra", "Kael"]).await;
        narrator.state.write().last_responder = Some("Lyra".into());
        for _ in 0..10 {
            let d = narrator.select_responder("anyone?").await.expect("route");
            assert_eq!(d.name, "Kael");
        }
    }

    #[tokio::test]
    async fn stage_directions_are_local() {
        let llm = Arc::new(ScriptedCompletion::new());
        let narrator = scene(&llm, &["Lyra", "Kael"]).await;

        let r = narrator.process_message("/remove Kael", None).await.expect("remove");
        assert_eq!(r.speaker, Speaker::Narrator);
        assert_eq!(narrator.present(), ["Lyra"]);

        let r = narrator.process_message("/characters", None).await.expect("list");
        assert_eq!(r.text, "Present: Lyra. Elsewhere: Kael.");

        narrator.process_message("/add Kael", None).await.expect("add");
        assert_eq!(narrator.present(), ["Lyra", "Kael"]);

        let r = narrator.process_message("/time next", None).await.expect("time");
        assert_eq!(r.clock.time_of_day(), TimeOfDay::Afternoon);

        let r = narrator.process_message("/dance", None).await.expect("unknown");
        assert_eq!(r.speaker, Speaker::System);
        assert!(r.text.starts_with("Unknown command: /dance"));

        assert!(matches!(
            narrator.process_message("/add Nobody", None).await,
            Err(SceneError::AgentNotFound(_))
        ));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn clock_moves_sync_present_characters() {
        let llm = Arc::new(ScriptedCompletion::new());
        let services = services(&llm);
        let narrator = scene(&llm, &["Lyra"]).await;
        let kael = handle("Kael", &services);
        narrator.add_character(Arc::clone(&kael)).await;
        narrator.leave("Kael").expect("leave");

        narrator.next_day().await;
        assert_eq!(kael.lock().await.clock(), Clock::default());

        narrator.join("Kael").await.expect("join");
        assert_eq!(kael.lock().await.clock(), narrator.clock());
    }

    #[tokio::test]
    async fn reply_directive_moves_whole_scene() {
        let llm = Arc::new(ScriptedCompletion::new());
        llm.push_reply("Rest now. [change_time:next_day]");
        let services = services(&llm);
        let narrator = scene(&llm, &["Lyra"]).await;
        let kael = handle("Kael", &services);
        narrator.add_character(Arc::clone(&kael)).await;

        let reply = narrator
            .process_message("Lyra, shall we rest?", None)
            .await
            .expect("reply");
        assert_eq!(reply.speaker, Speaker::Character("Lyra".into()));
        assert_eq!(reply.text, "Rest now.");
        assert_eq!(reply.clock.day(), 2);
        assert_eq!(kael.lock().await.clock(), reply.clock);
        assert_eq!(narrator.last_responder().as_deref(), Some("Lyra"));
    }

    #[tokio::test]
    async fn set_scene_rejects_strangers() {
        let llm = Arc::new(ScriptedCompletion::new());
        let narrator = scene(&llm, &["Lyra"]).await;
        let err = narrator
            .set_scene("harbor", Some(vec!["Lyra".into(), "Ghost".into()]))
            .await
            .expect_err("unknown");
        assert!(matches!(err, SceneError::AgentNotFound(n) if n == "Ghost"));
        assert_eq!(narrator.scene(), "forest clearing");
    }

    #[tokio::test]
    async fn narration_appends_plot_point() {
        let llm = Arc::new(ScriptedCompletion::new());
        llm.push_reply("  Thunder rolls over the hills. ");
        let narrator = scene(&llm, &["Lyra"]).await;
        let reply = narrator.direct_scene("a storm").await.expect("narrate");
        assert_eq!(reply.text, "Thunder rolls over the hills.");
        assert_eq!(narrator.plot_points(), ["Thunder rolls over the hills."]);
    }

    #[test]
    fn busy_gate_is_exclusive_until_dropped() {
        let gate = BusyGate::default();
        assert!(!gate.is_held());
        let permit = gate.try_enter().expect("free");
        assert!(gate.is_held());
        assert!(gate.try_enter().is_none());
        drop(permit);
        assert!(!gate.is_held());
        assert!(gate.try_enter().is_some());
    }

    #[tokio::test]
    async fn busy_narration_returns_placeholder() {
        let llm = Arc::new(ScriptedCompletion::new());
        let narrator = scene(&llm, &["Lyra"]).await;
        let permit = narrator.busy.try_enter().expect("free");
        assert!(narrator.is_busy());

        let reply = narrator.direct_scene("a storm").await.expect("narrate");
        assert_eq!(reply.text, BUSY_PLACEHOLDER);
        assert_eq!(llm.call_count(), 0);
        drop(permit);
        assert!(!narrator.is_busy());
    }
}
