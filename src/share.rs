use crate::types::ChatTurn;

pub const SHARE_TITLE: &str = "Socratic Math Tutor Explanation";

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("nothing to share")]
    Empty,

    #[error("Failed to copy to clipboard: {0}")]
    Clipboard(String),
}

/// Share text for a tutor reply. Student turns and empty replies have none.
pub fn share_text(turn: &ChatTurn) -> Option<String> {
    if turn.is_user() || turn.text().is_empty() {
        return None;
    }
    Some(format!(
        "Here's a math explanation from the Socratic Math Tutor:\n\n{}",
        turn.text()
    ))
}

/// Copies a turn's share text to the system clipboard and returns it.
pub fn copy_to_clipboard(turn: &ChatTurn) -> Result<String, ShareError> {
    let text = share_text(turn).ok_or(ShareError::Empty)?;
    let mut clipboard =
        arboard::Clipboard::new().map_err(|err| ShareError::Clipboard(err.to_string()))?;
    clipboard
        .set_text(text.clone())
        .map_err(|err| ShareError::Clipboard(err.to_string()))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tutor_turns_share_with_preamble() {
        let text = share_text(&ChatTurn::tutor("Differentiate term by term.", false)).unwrap();
        assert_eq!(
            text,
            "Here's a math explanation from the Socratic Math Tutor:\n\nDifferentiate term by term."
        );
    }

    #[test]
    fn empty_and_student_turns_cannot_be_shared() {
        assert!(share_text(&ChatTurn::tutor("", true)).is_none());
        assert!(share_text(&ChatTurn::user("my answer")).is_none());
        assert!(matches!(
            copy_to_clipboard(&ChatTurn::tutor("", false)),
            Err(ShareError::Empty)
        ));
    }
}
