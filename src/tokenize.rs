//! Word + code-symbol tokenizer shared by index build and query time.
//!
//! Lexical matching over technical content needs more than lowercase words:
//! a query like `std::vector<int>` should be able to match on `::` and `<`.
//! Tokenization therefore runs two passes over the input and concatenates
//! the streams: lowercase `[a-z0-9_]+` words first, then every occurrence of
//! a fixed symbol alphabet as standalone tokens.

/// Symbols preserved as first-class tokens. Two-character symbols are matched
/// before their single-character prefixes.
pub const CODE_SYMBOLS: [&str; 16] = [
    "::", "<<", ">>", "*", "&", "<", ">", "{", "}", "[", "]", "(", ")", "+", "-", "=",
];

const TWO_CHAR_SYMBOLS: [&str; 3] = ["::", "<<", ">>"];
const ONE_CHAR_SYMBOLS: [char; 13] = [
    '*', '&', '<', '>', '{', '}', '[', ']', '(', ')', '+', '-', '=',
];

/// True if `token` is one of the preserved code symbols.
pub fn is_symbol(token: &str) -> bool {
    CODE_SYMBOLS.contains(&token)
}

/// Tokenize `text`: lowercase word tokens followed by symbol tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();

    // Word pass: maximal runs of [a-z0-9_] over the lowercased input.
    let mut word = String::new();
    for ch in text.chars().flat_map(|c| c.to_lowercase()) {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            word.push(ch);
        } else if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }

    // Symbol pass over the original text, longest match first.
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if let Some(pair) = text.get(i..i + 2) {
            if TWO_CHAR_SYMBOLS.contains(&pair) {
                tokens.push(pair.to_string());
                i += 2;
                continue;
            }
        }
        let ch = bytes[i] as char;
        if bytes[i].is_ascii() && ONE_CHAR_SYMBOLS.contains(&ch) {
            tokens.push(ch.to_string());
        }
        // Symbols are all ASCII, so a byte-wise scan never splits a UTF-8
        // sequence at a match position.
        i += 1;
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_words() {
        assert_eq!(tokenize("Hello World"), vec!["hello", "world"]);
    }

    #[test]
    fn test_underscore_is_word_char() {
        assert_eq!(tokenize("snake_case_name"), vec!["snake_case_name"]);
    }

    #[test]
    fn test_symbols_are_standalone_tokens() {
        let tokens = tokenize("std::vector<int>");
        assert_eq!(tokens, vec!["std", "vector", "int", "::", "<", ">"]);
    }

    #[test]
    fn test_two_char_symbols_beat_one_char() {
        let tokens = tokenize("a << b >> c");
        assert!(tokens.contains(&"<<".to_string()));
        assert!(tokens.contains(&">>".to_string()));
        assert!(!tokens.contains(&"<".to_string()));
        assert!(!tokens.contains(&">".to_string()));
    }

    #[test]
    fn test_scope_resolution_not_split() {
        let tokens = tokenize("a::b");
        assert_eq!(tokens, vec!["a", "b", "::"]);
    }

    #[test]
    fn test_words_before_symbols() {
        let tokens = tokenize("x + y");
        assert_eq!(tokens, vec!["x", "y", "+"]);
    }

    #[test]
    fn test_non_ascii_is_boundary() {
        let tokens = tokenize("café menu");
        // The accented char splits the word run; nothing panics.
        assert!(tokens.contains(&"caf".to_string()));
        assert!(tokens.contains(&"menu".to_string()));
    }

    #[test]
    fn test_empty_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \n\t ").is_empty());
    }

    #[test]
    fn test_is_symbol() {
        assert!(is_symbol("::"));
        assert!(is_symbol("="));
        assert!(!is_symbol("word"));
    }
}
