//! Tokens of the formula language.

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("**")]
    #[token("^")]
    Pow,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,

    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,

    #[token("&")]
    #[token("&&")]
    #[token("and")]
    And,
    #[token("|")]
    #[token("||")]
    #[token("or")]
    Or,
    #[token("!")]
    #[token("~")]
    #[token("not")]
    Not,

    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    /// Identifier, possibly a dotted entity path such as `env.oxy`.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*", |lex| lex.slice().to_string())]
    Ident(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token> {
        Token::lexer(src).map(|t| t.unwrap()).collect()
    }

    #[test]
    fn lexes_operators_and_paths() {
        assert_eq!(
            lex("microbes.cyano.biomass ** 2 <= 1.5e-3"),
            vec![
                Token::Ident("microbes.cyano.biomass".into()),
                Token::Pow,
                Token::Number(2.0),
                Token::Le,
                Token::Number(1.5e-3),
            ]
        );
    }

    #[test]
    fn keywords_win_over_identifiers() {
        assert_eq!(
            lex("x and not y or notable"),
            vec![
                Token::Ident("x".into()),
                Token::And,
                Token::Not,
                Token::Ident("y".into()),
                Token::Or,
                Token::Ident("notable".into()),
            ]
        );
    }

    #[test]
    fn rejects_stray_characters() {
        assert!(Token::lexer("x $ y").any(|t| t.is_err()));
    }
}
