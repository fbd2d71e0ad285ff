//! Golden checks for the prompt templates.
//!
//! Renders every template with realistic variables and checks that nothing is
//! left unfilled, and that the shipped TOML templates agree with the
//! built-ins on placeholders and generation bounds.

use chorus_llm::prompt::{PromptEngine, PromptId};

struct GoldenCase {
    name: &'static str,
    id: PromptId,
    vars: Vec<(&'static str, &'static str)>,
    must_contain: Vec<&'static str>,
}

fn golden_cases() -> Vec<GoldenCase> {
    vec![
        GoldenCase {
            name: "lyra_greets_guest",
            id: PromptId::CharacterPersona,
            vars: vec![
                ("name", "Lyra"),
                ("background", "A wandering bard who collects forgotten songs."),
                ("user_name", "Guest"),
                ("user_persona", "A curious visitor to the website."),
                ("day", "3"),
                ("time_of_day", "evening"),
                ("message", "Do you know any songs about the sea?"),
            ],
            must_contain: vec![
                "Lyra: A wandering bard",
                "User (Guest): A curious visitor",
                "day 3, evening",
                "[change_time:next_time]",
                "[tool:get_weather:LOCATION]",
                "Guest: Do you know any songs",
            ],
        },
        GoldenCase {
            name: "summary_of_short_chat",
            id: PromptId::MemorySummary,
            vars: vec![("transcript", "user: Guest: hi\nassistant: hello\n")],
            must_contain: vec!["long-term memory", "assistant: hello"],
        },
        GoldenCase {
            name: "route_between_two",
            id: PromptId::ResponderSelection,
            vars: vec![
                ("scene", "forest clearing"),
                ("characters", "Lyra, Kael"),
                ("plot_points", "A storm is coming."),
                ("user_name", "Guest"),
                ("message", "Who lit the fire?"),
            ],
            must_contain: vec!["forest clearing", "Lyra, Kael", "name only", "Who lit the fire?"],
        },
        GoldenCase {
            name: "narrate_nightfall",
            id: PromptId::SceneNarration,
            vars: vec![
                ("scene", "harbor"),
                ("day", "2"),
                ("time_of_day", "night"),
                ("characters", "Lyra"),
                ("plot_points", "(none yet)"),
                ("direction", "A ship arrives without a crew."),
            ],
            must_contain: vec!["harbor", "day 2, night", "A ship arrives"],
        },
        GoldenCase {
            name: "suggest_a_rival",
            id: PromptId::CharacterSuggestion,
            vars: vec![
                ("scene", "royal court"),
                ("characters", "Lyra"),
                ("request", "Someone who distrusts bards."),
            ],
            must_contain: vec!["royal court", "distrusts bards", "one new character"],
        },
    ]
}

fn engines() -> Vec<(&'static str, PromptEngine)> {
    let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/v1");
    vec![
        ("builtin", PromptEngine::builtin()),
        ("v1", PromptEngine::from_directory(dir).expect("shipped templates load")),
    ]
}

#[test]
fn golden_prompts_render_completely() {
    for (engine_name, engine) in engines() {
        for case in golden_cases() {
            let rendered = engine.render(case.id, &case.vars).expect("render");
            let full = format!("{}\n{}", rendered.system, rendered.user);
            for needle in &case.must_contain {
                assert!(
                    full.contains(needle),
                    "[{engine_name}/{}] missing {needle:?} in:\n{full}",
                    case.name
                );
            }
            for (key, _) in &case.vars {
                assert!(
                    !full.contains(&format!("{{{key}}}")),
                    "[{engine_name}/{}] placeholder {{{key}}} left unrendered",
                    case.name
                );
            }
        }
    }
}

#[test]
fn shipped_templates_match_builtin_bounds() {
    let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/v1");
    let shipped = PromptEngine::from_directory(dir).expect("load");
    let builtin = PromptEngine::builtin();
    assert_eq!(shipped.len(), builtin.len());

    for id in PromptId::ALL {
        let a = shipped.get(id).expect("shipped").options();
        let b = builtin.get(id).expect("builtin").options();
        assert_eq!(a, b, "{id} bounds drifted");
    }
}

#[test]
fn overrides_fall_back_to_builtin() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("scene_narration.toml"),
        "[prompt]\nversion = \"x\"\nmax_tokens = 64\ntemperature = 0.5\nsystem = \"S {scene}\"\nuser = \"U\"\n",
    )
    .expect("write");

    let engine = PromptEngine::with_overrides(dir.path()).expect("overrides");
    assert_eq!(engine.get(PromptId::SceneNarration).expect("narration").max_tokens, 64);
    assert_eq!(engine.get(PromptId::CharacterPersona).expect("persona").version, "builtin");
}
