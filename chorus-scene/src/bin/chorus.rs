//! Interactive console for a chorus scene.
//!
//! ```bash
//! cargo run -p chorus-scene --bin chorus -- chorus.toml
//! ```
//!
//! Plain lines go to the active narrator, `/...` lines are stage commands,
//! and `!...` lines are console commands (`!help` lists them).

use std::path::Path;

use chorus_core::{ChorusConfig, Persona};
use chorus_core::config::CharacterSeed;
use chorus_scene::{NarratorReply, Orchestrator, SceneError, Speaker, SuggestionTicket};
use tokio::io::{AsyncBufReadExt, BufReader};

const CONSOLE_HELP: &str = "Console commands:
!narrators                 list narrators
!new <id> [scene]          create a narrator
!use <id>                  switch the active narrator
!char <name> <background>  create a character
!chat <name> <message>     talk to one character directly
!direct <prompt>           ask the narrator to narrate
!suggest <request>         ask for a new character idea
!summarize <name>          move a character's recent turns to long-term memory
!personas                  list stored personas
!persona <name> <desc>     create a persona, or update its description
!forget-persona <name>     delete a persona
!as <persona> <message>    talk to the narrator as a stored persona
!quit                      save and exit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => ChorusConfig::from_file(Path::new(&path))?,
        None => ChorusConfig::default(),
    };
    Orchestrator::init_tracing(&config.general.log_level);

    if config.characters.is_empty() {
        config.characters.push(CharacterSeed {
            name: "Lyra".to_string(),
            intro: "A bard tunes her lute by the fire.".to_string(),
            background: "A wandering bard who collects forgotten songs.".to_string(),
            profile: String::new(),
        });
    }

    let chorus = Orchestrator::open(config).await?;
    tracing::info!(characters = ?chorus.list_characters(), "chorus ready");
    println!("Type a message, /help for stage commands, !help for console commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match handle_line(&chorus, line).await {
            Ok(Some(output)) => println!("{output}"),
            Ok(None) => break,
            Err(e) => eprintln!("error: {e}"),
        }
    }

    chorus.save().await?;
    Ok(())
}

async fn handle_line(chorus: &Orchestrator, line: &str) -> Result<Option<String>, SceneError> {
    let Some(command) = line.strip_prefix('!') else {
        let reply = chorus.narrator_chat(line, None, None).await?;
        return Ok(Some(render(reply)));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(n, r)| (n, r.trim()));
    let output = match name {
        "quit" | "exit" => return Ok(None),
        "help" => CONSOLE_HELP.to_string(),
        "narrators" => chorus
            .list_narrators()
            .iter()
            .map(|n| {
                format!(
                    "{} {} ({}, day {} {}) [{}]",
                    if n.is_active { "*" } else { " " },
                    n.id,
                    n.scene,
                    n.day,
                    n.time_of_day,
                    n.characters.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        "new" => {
            let (id, scene) = split_word(rest);
            chorus
                .create_narrator(id, (!scene.is_empty()).then_some(scene))
                .await?;
            format!("Created narrator '{id}'.")
        }
        "use" => {
            chorus.set_active_narrator(rest).await?;
            format!("Now narrating '{rest}'.")
        }
        "char" => {
            let (name, background) = split_word(rest);
            chorus
                .create_character(chorus_scene::CharacterProfile::new(name, background))
                .await?;
            format!("Created {name}. Use /add {name} to bring them into the scene.")
        }
        "chat" => {
            let (name, message) = split_word(rest);
            let reply = chorus.chat_with(name, message, None, None).await?;
            format!("{name}: {} ({})", reply.text, reply.clock)
        }
        "direct" => chorus.direct_scene(rest).await?.text,
        "suggest" => match chorus.suggest_character(rest)? {
            SuggestionTicket::Busy => chorus_scene::BUSY_PLACEHOLDER.to_string(),
            SuggestionTicket::Pending { id } => match chorus.wait_for_suggestion(id).await {
                Some(status) => format!("{status:?}"),
                None => "Suggestion vanished.".to_string(),
            },
        },
        "summarize" => match chorus.summarize_character(rest).await? {
            Some(record) => format!("Stored memory {}.", record.id),
            None => "Nothing to summarize.".to_string(),
        },
        "personas" => chorus
            .list_personas()
            .iter()
            .map(|p| format!("{}: {}", p.name, p.description))
            .collect::<Vec<_>>()
            .join("\n"),
        "persona" => {
            let (name, description) = split_word(rest);
            match chorus.create_persona(Persona::new(name, description)).await {
                Ok(()) => format!("Created persona '{name}'."),
                Err(SceneError::DuplicateIdentity(_)) => {
                    chorus.edit_persona(name, description).await?;
                    format!("Updated persona '{name}'.")
                }
                Err(e) => return Err(e),
            }
        }
        "forget-persona" => {
            chorus.delete_persona(rest).await?;
            format!("Deleted persona '{rest}'.")
        }
        "as" => {
            let (persona, message) = split_word(rest);
            render(chorus.narrator_chat(message, None, Some(persona)).await?)
        }
        other => format!("Unknown console command '!{other}'. Type !help."),
    };
    Ok(Some(output))
}

fn render(reply: NarratorReply) -> String {
    match reply.speaker {
        Speaker::Character(name) => format!("{name}: {}", reply.text),
        Speaker::Narrator => format!("* {} *", reply.text),
        Speaker::System => reply.text,
    }
}

fn split_word(input: &str) -> (&str, &str) {
    input
        .split_once(char::is_whitespace)
        .map_or((input, ""), |(head, tail)| (head, tail.trim()))
}
