//! Prompt construction for generative replies.

/// User prompt for one viewer comment.
pub fn build_prompt(product: &str, nickname: &str, comment: &str) -> String {
    format!(
        "We are presenting {product} on a live stream.\n\
         Viewer \"{nickname}\" commented: \"{comment}\"\n\
         Reply to them by name in at most two short spoken sentences."
    )
}
