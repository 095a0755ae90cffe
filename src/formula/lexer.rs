//! Tokenizer for formula text.

use super::FormulaError;

/// Longest formula text accepted, in bytes
pub const MAX_FORMULA_LENGTH: usize = 1024;

/// Most tokens a formula may contain
pub const MAX_TOKENS: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(value) => format!("number {}", value),
            TokenKind::Ident(name) => format!("'{}'", name),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::Caret => "'^'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Character offset of the token start, 1-based for messages
    pub position: usize,
}

pub fn tokenize(text: &str) -> Result<Vec<Token>, FormulaError> {
    if text.len() > MAX_FORMULA_LENGTH {
        return Err(FormulaError::TooLong);
    }

    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if tokens.len() >= MAX_TOKENS {
            return Err(FormulaError::TooLong);
        }

        let c = chars[i];
        let position = i + 1;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Exponent only when digits follow, so `2e` still reads as 2 * e
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }

            let literal: String = chars[start..i].iter().collect();
            let value = literal
                .parse::<f64>()
                .map_err(|_| FormulaError::InvalidNumber(literal.clone()))?;
            tokens.push(Token { kind: TokenKind::Number(value), position });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            tokens.push(Token { kind: TokenKind::Ident(name), position });
            continue;
        }

        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '^' => TokenKind::Caret,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            other => {
                return Err(FormulaError::UnexpectedCharacter {
                    character: other,
                    position,
                })
            }
        };
        tokens.push(Token { kind, position });
        i += 1;
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            kinds("x+-*/^(),"),
            vec![
                TokenKind::Ident("x".to_string()),
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Caret,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Comma,
            ]
        );
    }

    #[test]
    fn test_tokenize_numbers() {
        assert_eq!(kinds("12"), vec![TokenKind::Number(12.0)]);
        assert_eq!(kinds("0.25"), vec![TokenKind::Number(0.25)]);
        assert_eq!(kinds(".5"), vec![TokenKind::Number(0.5)]);
        assert_eq!(kinds("1e3"), vec![TokenKind::Number(1000.0)]);
        assert_eq!(kinds("2.5E-1"), vec![TokenKind::Number(0.25)]);
    }

    #[test]
    fn test_tokenize_number_then_constant_e() {
        assert_eq!(
            kinds("2e"),
            vec![TokenKind::Number(2.0), TokenKind::Ident("e".to_string())]
        );
    }

    #[test]
    fn test_tokenize_positions() {
        let tokens = tokenize("  xp * 2").unwrap();
        assert_eq!(tokens[0].position, 3);
        assert_eq!(tokens[1].position, 6);
        assert_eq!(tokens[2].position, 8);
    }

    #[test]
    fn test_tokenize_invalid_number() {
        assert!(matches!(tokenize("1.2.3"), Err(FormulaError::InvalidNumber(_))));
    }

    #[test]
    fn test_tokenize_unexpected_character() {
        assert_eq!(
            tokenize("x # 2"),
            Err(FormulaError::UnexpectedCharacter { character: '#', position: 3 })
        );
    }

    #[test]
    fn test_tokenize_rejects_oversized_input() {
        assert_eq!(tokenize(&"x".repeat(MAX_FORMULA_LENGTH + 1)), Err(FormulaError::TooLong));
        assert_eq!(tokenize(&"(".repeat(100_000)), Err(FormulaError::TooLong));

        let at_limit = vec!["x"; MAX_TOKENS / 2 + 1].join("+");
        assert_eq!(tokenize(&at_limit), Err(FormulaError::TooLong));

        let under_limit = vec!["x"; MAX_TOKENS / 2].join("+");
        assert_eq!(tokenize(&under_limit).unwrap().len(), MAX_TOKENS - 1);
    }
}
