//! RFC 6901 JSON pointer helpers for evidence references.
//!
//! Evidence never holds object references; it points into the serialized
//! report tree. Pointers into finalizer output carry the `/analysis`
//! prefix, pointers into parser output address the owning section
//! directly.

/// Escapes one reference token per RFC 6901 (`~` → `~0`, `/` → `~1`).
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Builds a JSON pointer from reference tokens.
pub fn build(tokens: &[&str]) -> String {
    let mut pointer = String::new();
    for token in tokens {
        pointer.push('/');
        pointer.push_str(&escape_token(token));
    }
    pointer
}

/// Pointer to a thread by index.
pub fn thread(index: usize) -> String {
    format!("/threads/threads/{index}")
}

/// Pointer to a stack frame by thread and frame index.
pub fn frame(thread_index: usize, frame_index: usize) -> String {
    format!("/threads/threads/{thread_index}/callStack/{frame_index}")
}

/// Pointer to a module by index.
pub fn module(index: usize) -> String {
    format!("/modules/{index}")
}

/// Pointer to the exception section.
pub fn exception() -> String {
    "/exception".to_owned()
}

/// Pointer to a timeline thread entry by index.
pub fn timeline_thread(index: usize) -> String {
    format!("/analysis/timeline/threads/{index}")
}

/// Pointer to a deadlock cycle by index.
pub fn deadlock(index: usize) -> String {
    format!("/analysis/timeline/deadlocks/{index}")
}

/// Pointer to the synchronization section.
pub fn synchronization() -> String {
    "/synchronization".to_owned()
}

/// Pointer to the memory section.
pub fn memory() -> String {
    "/memory".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_token() {
        assert_eq!(escape_token("a/b"), "a~1b");
        assert_eq!(escape_token("x~y"), "x~0y");
        assert_eq!(escape_token("plain"), "plain");
    }

    #[test]
    fn test_build() {
        assert_eq!(build(&["analysis", "findings", "0"]), "/analysis/findings/0");
        assert_eq!(build(&["a/b"]), "/a~1b");
    }

    #[test]
    fn test_frame_pointer() {
        assert_eq!(frame(2, 5), "/threads/threads/2/callStack/5");
    }
}
