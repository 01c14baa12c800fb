//! Prompt templates for the finalization sub-steps.

/// Prompt for rolling the global summary forward over a finished chapter.
pub fn summary_update_prompt(old_summary: &str, chapter_text: &str) -> String {
    format!(
        "You maintain the running summary of a novel. Fold the events of the \
         newly finished chapter into the existing summary. Keep it concise, \
         chronological, and spoiler-complete. Output only the updated summary \
         with no commentary.\n\n\
         Existing summary:\n{old_summary}\n\n\
         New chapter:\n{chapter_text}\n"
    )
}

/// Prompt for updating the character-state sheet from a finished chapter.
pub fn character_state_prompt(old_state: &str, chapter_text: &str) -> String {
    format!(
        "You maintain the character-state sheet of a novel: for each character \
         track status, location, relationships, and open goals. Update the \
         sheet to reflect the newly finished chapter, preserving entries the \
         chapter does not touch. Output only the updated sheet with no \
         commentary.\n\n\
         Current character state:\n{old_state}\n\n\
         New chapter:\n{chapter_text}\n"
    )
}
