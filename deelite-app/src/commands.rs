//! Subcommand handlers.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context};
use base64::Engine as _;
use deelite_core::{
    audio::device::{list_devices, DeviceDirection},
    genai::recipes::FlavorProfile,
    AnalysisResult, AssistantComponents, AssistantConfig, AssistantStatus, AssistantStatusEvent,
    ChefChat, ErrorKind, GenerativeClient, VoiceAssistant,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::info;

use crate::settings::{data_dir, save_settings, AppSettings};
use crate::storage::{today, LessonStore};

fn require_key(settings: &AppSettings) -> anyhow::Result<&str> {
    match settings.api_key.as_deref() {
        Some(key) => Ok(key),
        None => bail!("no API key: set DEELITE_API_KEY (or GEMINI_API_KEY) or pass --api-key"),
    }
}

fn text_client(settings: &AppSettings, api_key: &str) -> anyhow::Result<GenerativeClient> {
    GenerativeClient::with_endpoint(&settings.rest_endpoint, api_key, &settings.text_model)
        .context("building http client")
}

// ---------------------------------------------------------------------------
// voice
// ---------------------------------------------------------------------------

pub async fn voice(settings: &AppSettings, show_levels: bool) -> anyhow::Result<()> {
    require_key(settings)?;
    let session = settings.session_config();
    let config = AssistantConfig::default();
    let components = AssistantComponents::system(
        &config,
        settings.input_device.clone(),
        settings.output_device.as_deref(),
    )
    .context("opening audio output")?;

    let mut assistant = VoiceAssistant::new(config);
    let mut status = assistant.subscribe_status();
    if show_levels {
        let mut levels = assistant.subscribe_levels();
        tokio::spawn(async move {
            loop {
                match levels.recv().await {
                    Ok(ev) => {
                        let bars = ((ev.rms * 200.0).clamp(0.0, 40.0)) as usize;
                        eprint!("\r🎤 {:<40}", "▮".repeat(bars));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    println!(
        "Calling Chef Dee-Lite (voice {}). Press Ctrl-C to hang up.",
        session.voice
    );
    assistant.start(session, components)?;

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("hang-up requested");
            Ok(())
        }
        ended = watch_status(&mut status) => ended,
    };
    assistant.close().await?;

    let diag = assistant.diagnostics_snapshot();
    info!(
        frames_sent = diag.frames_sent,
        chunks_scheduled = diag.chunks_scheduled,
        interruptions = diag.interruptions,
        "call ended"
    );
    outcome
}

/// Print status changes until the session reaches a terminal state.
async fn watch_status(rx: &mut broadcast::Receiver<AssistantStatusEvent>) -> anyhow::Result<()> {
    loop {
        let event = match rx.recv().await {
            Ok(ev) => ev,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        };
        println!("{}", status_line(&event));
        match event.status {
            AssistantStatus::Closed => return Ok(()),
            AssistantStatus::Errored => {
                let reason = event.detail.unwrap_or_else(|| "unknown error".into());
                match event.error_kind.and_then(error_hint) {
                    Some(hint) => bail!("{reason} ({hint})"),
                    None => bail!("{reason}"),
                }
            }
            _ => {}
        }
    }
}

fn status_line(event: &AssistantStatusEvent) -> String {
    match event.status {
        AssistantStatus::Connecting => "… connecting".into(),
        AssistantStatus::Listening => "👂 listening".into(),
        AssistantStatus::Speaking => "🗣  Chef Dee-Lite is speaking".into(),
        AssistantStatus::Closed => "call ended".into(),
        AssistantStatus::Errored => format!(
            "⚠ {}",
            event.detail.as_deref().unwrap_or("something went wrong")
        ),
    }
}

fn error_hint(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::Permission => Some("check that a microphone is connected and allowed"),
        ErrorKind::Connect => Some("check the API key and network connection"),
        ErrorKind::Device => Some("run `deelite devices` to pick another device"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// analyze
// ---------------------------------------------------------------------------

fn image_mime(path: &Path) -> anyhow::Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    Ok(match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        other => bail!("unsupported image type '{other}' (use jpeg, png, webp or heic)"),
    })
}

pub async fn analyze(settings: &AppSettings, image: &Path, json: bool) -> anyhow::Result<()> {
    let client = text_client(settings, require_key(settings)?)?;
    let mime = image_mime(image)?;
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("reading {}", image.display()))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

    println!("Looking at your leftovers…");
    let result = client.analyze_leftovers(&encoded, mime).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_analysis(&result));
    }
    Ok(())
}

fn flavor_badge(flavor: FlavorProfile) -> &'static str {
    match flavor {
        FlavorProfile::Sweet => "🍯 Sweet",
        FlavorProfile::Sour => "🍋 Sour",
        FlavorProfile::Salty => "🧂 Salty",
    }
}

fn render_analysis(result: &AnalysisResult) -> String {
    let mut out = format!(
        "Spotted: {}\n",
        result.identified_ingredients.join(", ")
    );
    for recipe in &result.recipes {
        out.push_str(&format!(
            "\n{} · {} ({:?}, {} min)\n  {}\n",
            flavor_badge(recipe.flavor_profile),
            recipe.title,
            recipe.difficulty,
            recipe.prep_time_minutes.round(),
            recipe.description
        ));
        if !recipe.missing_ingredients.is_empty() {
            out.push_str(&format!("  You'll also need: {}\n", recipe.missing_ingredients.join(", ")));
        }
        for (i, step) in recipe.steps.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, step.instruction));
            if let Some(tip) = &step.tip {
                out.push_str(&format!("     tip: {tip}\n"));
            }
        }
        out.push_str(&format!("  Fun fact: {}\n", recipe.fun_fact));
    }
    out
}

// ---------------------------------------------------------------------------
// chat
// ---------------------------------------------------------------------------

pub async fn chat(settings: &AppSettings) -> anyhow::Result<()> {
    let mut chat = ChefChat::new(text_client(settings, require_key(settings)?)?);
    println!("Chat with Chef Dee-Lite. /reset starts over, /quit or an empty line leaves.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        match message {
            "" | "/quit" => break,
            "/reset" => {
                chat.reset();
                println!("(fresh start)");
            }
            _ => match chat.send(message).await {
                Ok(reply) => println!("chef> {}", reply.trim()),
                Err(e) => println!("chef> (couldn't answer that one, try again: {e})"),
            },
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// lesson
// ---------------------------------------------------------------------------

pub async fn lesson(settings: &AppSettings, refresh: bool) -> anyhow::Result<()> {
    let store = LessonStore::in_dir(&data_dir());
    let today = today();

    let cached = if refresh { None } else { store.lesson_for(today) };
    let lesson = match cached {
        Some(lesson) => lesson,
        None => {
            let key = settings.api_key.clone().unwrap_or_default();
            let lesson = text_client(settings, &key)?.daily_lesson().await;
            if let Err(e) = store.store(today, &lesson) {
                tracing::warn!("could not cache lesson: {e}");
            }
            lesson
        }
    };
    println!("{} {}\n{}", lesson.emoji, lesson.title, lesson.content);
    Ok(())
}

// ---------------------------------------------------------------------------
// devices / config
// ---------------------------------------------------------------------------

pub fn devices() {
    let devices = list_devices();
    if devices.is_empty() {
        println!("no audio devices found");
        return;
    }
    for device in devices {
        let direction = match device.direction {
            DeviceDirection::Input => "in ",
            DeviceDirection::Output => "out",
        };
        let mut flags = Vec::new();
        if device.is_default {
            flags.push("default");
        }
        if device.is_loopback_like {
            flags.push("loopback");
        }
        if flags.is_empty() {
            println!("{direction}  {}", device.name);
        } else {
            println!("{direction}  {} [{}]", device.name, flags.join(", "));
        }
    }
}

pub fn config(settings: &AppSettings, path: &Path, write: bool) -> anyhow::Result<()> {
    let mut shown = settings.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("<redacted>".into());
    }
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(&shown)?);
    if write {
        save_settings(path, settings).with_context(|| format!("writing {}", path.display()))?;
        println!("saved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deelite_core::genai::recipes::{Difficulty, RecipeStep};
    use deelite_core::Recipe;

    #[test]
    fn mime_follows_extension() {
        assert_eq!(image_mime(Path::new("fridge.JPG")).unwrap(), "image/jpeg");
        assert_eq!(image_mime(Path::new("a/b.webp")).unwrap(), "image/webp");
        assert!(image_mime(Path::new("notes.txt")).is_err());
        assert!(image_mime(Path::new("no_extension")).is_err());
    }

    #[test]
    fn missing_key_is_reported() {
        let settings = AppSettings::default();
        let err = require_key(&settings).unwrap_err();
        assert!(err.to_string().contains("DEELITE_API_KEY"));
    }

    #[test]
    fn analysis_lists_steps_tips_and_missing_items() {
        let result = AnalysisResult {
            identified_ingredients: vec!["rice".into(), "egg".into()],
            recipes: vec![Recipe {
                id: "r1".into(),
                title: "Rice Pudding".into(),
                description: "Creamy and cozy.".into(),
                flavor_profile: FlavorProfile::Sweet,
                ingredients_used: vec!["rice".into()],
                missing_ingredients: vec!["milk".into()],
                steps: vec![RecipeStep {
                    instruction: "Simmer the rice in milk.".into(),
                    tip: Some("Stir so it doesn't stick.".into()),
                }],
                prep_time_minutes: 24.6,
                difficulty: Difficulty::Easy,
                fun_fact: "Rice pudding is ancient.".into(),
            }],
        };
        let text = render_analysis(&result);
        assert!(text.starts_with("Spotted: rice, egg"));
        assert!(text.contains("🍯 Sweet · Rice Pudding (Easy, 25 min)"));
        assert!(text.contains("You'll also need: milk"));
        assert!(text.contains("1. Simmer the rice in milk."));
        assert!(text.contains("tip: Stir so it doesn't stick."));
    }

    #[test]
    fn errored_status_line_shows_detail() {
        let event = AssistantStatusEvent {
            seq: 3,
            status: AssistantStatus::Errored,
            detail: Some("socket reset".into()),
            error_kind: Some(ErrorKind::Transport),
        };
        assert_eq!(status_line(&event), "⚠ socket reset");
        assert!(error_hint(ErrorKind::Permission).is_some());
        assert!(error_hint(ErrorKind::Transport).is_none());
    }
}
