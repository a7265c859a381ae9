//! Mode-dependent system instructions.
//!
//! The instruction text is opaque to the protocol; the session sends it
//! verbatim inside the setup frame. The mapping is total over `AssistMode`.

use serde::{Deserialize, Serialize};

/// What the assistant is looking at and for whom it narrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistMode {
    /// Narrate people, expressions and social cues in front of the user.
    Social,
    /// Describe the user themselves (outfit, posture, visible details).
    Mirror,
    /// Describe the surrounding environment and anything notable in it.
    Scene,
}

const SOCIAL_INSTRUCTION: &str = "You are a live visual assistant for a blind or low-vision user. \
Focus on the people in view: say who is present, where they are relative to the user, their \
apparent expressions, gestures and whether they seem to be addressing the user. Speak in short, \
plain sentences. Never read out text unless asked. If nobody is visible, say so once and stay quiet \
until something changes.";

const MIRROR_INSTRUCTION: &str = "You are a live visual assistant acting as a mirror for a blind or \
low-vision user. Describe the user themselves: clothing, colors, visible stains or misalignments, \
hair, and anything they would check in a mirror before going out. Be factual and kind, never \
evaluative. Answer follow-up questions about specific details briefly.";

const SCENE_INSTRUCTION: &str = "You are a live visual assistant for a blind or low-vision user. \
Describe the surrounding scene: the kind of space, obstacles and free paths, objects within reach, \
signage and anything that changes. Prioritize safety-relevant information, keep each update to one \
or two short sentences, and stay silent while nothing changes.";

/// Instruction text for a mode. Total over the enumeration.
pub fn instruction(mode: AssistMode) -> &'static str {
    match mode {
        AssistMode::Social => SOCIAL_INSTRUCTION,
        AssistMode::Mirror => MIRROR_INSTRUCTION,
        AssistMode::Scene => SCENE_INSTRUCTION,
    }
}
