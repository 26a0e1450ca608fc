use onair_core::messages::{Message, Participant};
use onair_core::provider::ChatMessage;

use crate::normalize::strip_turn_marker;
use crate::roster::{EpisodeMeta, Persona, SHOW_DIRECTIVE};

/// Rendered in place of an empty transcript.
pub const EMPTY_CONTEXT: &str = "(empty)";

/// Render recent messages as `PARTICIPANT: text` lines, turn markers removed.
pub fn render_context(messages: &[Message]) -> String {
    if messages.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }
    messages
        .iter()
        .map(|m| format!("{}: {}", m.participant, strip_turn_marker(&m.text)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the three-part prompt for `speaker` producing turn `turn`.
pub fn build_prompt(
    episode: &EpisodeMeta,
    speaker: &Persona,
    context: &str,
    turn: u32,
) -> Vec<ChatMessage> {
    let show = format!(
        "{SHOW_DIRECTIVE} Episode: \"{}\". Mood: {}. Tempo: {} bpm. \
         Every line ends with its turn marker, e.g. \"(turn N)\".",
        episode.title, episode.mood, episode.bpm
    );
    let user = format!(
        "Mood: {mood}. Tempo: {bpm} bpm.\n\nRecent transcript:\n{context}\n\n\
         Write the next line as {speaker}. Keep it short. End with \"(turn {turn})\".",
        mood = episode.mood,
        bpm = episode.bpm,
        speaker = speaker.participant,
    );
    vec![
        ChatMessage::system(show),
        ChatMessage::system(speaker.directive),
        ChatMessage::user(user),
    ]
}

/// Body of the synthetic failure line, before normalisation.
pub fn system_notice(reason: &str) -> String {
    format!("{}: {reason}", Participant::System)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use onair_core::ids::SessionId;
    use onair_core::provider::ChatRole;

    use super::*;
    use crate::roster::speaker_for_turn;

    fn msg(idx: u64, participant: Participant, text: &str) -> Message {
        Message {
            session_id: SessionId::from_raw("sess_prompt"),
            idx,
            participant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn empty_context_uses_sentinel() {
        assert_eq!(render_context(&[]), "(empty)");
    }

    #[test]
    fn context_strips_turn_markers() {
        let rendered = render_context(&[
            msg(0, Participant::DjClaw, "Welcome to Claw Radio. (turn 0)"),
            msg(1, Participant::AgentB, "Glad to be here (turn 1)"),
        ]);
        assert_eq!(
            rendered,
            "DJ_CLAW: Welcome to Claw Radio.\nAGENT_B: Glad to be here"
        );
    }

    #[test]
    fn prompt_has_show_persona_and_instruction() {
        let speaker = speaker_for_turn(2);
        let prompt = build_prompt(&EpisodeMeta::default(), speaker, "DJ_CLAW: hi", 2);

        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt[0].role, ChatRole::System);
        assert!(prompt[0].content.starts_with(SHOW_DIRECTIVE));
        assert!(prompt[0].content.contains("92 bpm"));
        assert_eq!(prompt[1].content, speaker.directive);
        assert_eq!(prompt[2].role, ChatRole::User);
        assert!(prompt[2].content.contains("Recent transcript:\nDJ_CLAW: hi"));
        assert!(prompt[2]
            .content
            .ends_with("Write the next line as AGENT_B. Keep it short. End with \"(turn 2)\"."));
    }

    #[test]
    fn system_notice_format() {
        assert_eq!(system_notice("timed out"), "SYSTEM: timed out");
    }
}
