//! Configurable parts of the HBX grammar.
//!
//! The mustache delimiters and HTML structure are fixed; the marker sigils,
//! branch keywords and raw-text elements are not, so that a host can line the
//! grammar up with its own conventions.

/// Recognized markers and keywords.
///
/// Sigils are matched immediately after `{{` (and an optional `~`), so they
/// must not collide with `#`, `/`, `^`, `!`, `~` or `{`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    /// Words that open a new branch of the innermost block (`{{else}}`).
    pub branch_keywords: Vec<String>,
    /// Helpers that may chain into each other through a branch keyword
    /// (`{{#if a}}…{{else unless b}}…{{/if}}`).
    pub chain_groups: Vec<Vec<String>>,
    /// `{{$card.title}}` marks a CSS module class lookup.
    pub css_module_sigil: char,
    /// `{{> header}}` marks a render-prop binding.
    pub render_prop_sigil: char,
    /// `<style scoped>` marks a scoped style block.
    pub scoped_style_attribute: String,
    /// Elements whose body is kept verbatim.
    pub raw_text_elements: Vec<String>,
}

impl Default for Syntax {
    fn default() -> Self {
        Self {
            branch_keywords: vec!["else".to_string()],
            chain_groups: vec![vec!["if".to_string(), "unless".to_string()]],
            css_module_sigil: '$',
            render_prop_sigil: '>',
            scoped_style_attribute: "scoped".to_string(),
            raw_text_elements: vec!["script".to_string(), "style".to_string()],
        }
    }
}

impl Syntax {
    pub fn is_branch_keyword(&self, word: &str) -> bool {
        self.branch_keywords.iter().any(|k| k == word)
    }

    /// Whether a block opened with `block` accepts `{{else chained …}}`.
    pub fn accepts_chain(&self, block: &str, chained: &str) -> bool {
        block == chained
            || self.chain_groups.iter().any(|group| {
                group.iter().any(|name| name == block) && group.iter().any(|name| name == chained)
            })
    }

    pub fn is_raw_text_element(&self, tag: &str) -> bool {
        self.raw_text_elements
            .iter()
            .any(|name| name.eq_ignore_ascii_case(tag))
    }

    pub fn is_scoped_style(&self, tag: &str, attribute: &str) -> bool {
        tag.eq_ignore_ascii_case("style") && attribute == self.scoped_style_attribute
    }
}
