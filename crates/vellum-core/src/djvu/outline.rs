//! Parser for the outline s-expression emitted by `djvused print-outline`.
//!
//! The format is a lisp-style tree:
//!
//! ```text
//! (bookmarks
//!  ("Chapter 1" "#1"
//!   ("Section 1.1" "#3"))
//!  ("Chapter 2" "#10"))
//! ```
//!
//! Parsing is tolerant: malformed input yields an empty (or truncated)
//! list, never an error - a broken outline degrades the result, it does
//! not fail a conversion.

/// One bookmark node. The tree is built fresh from a flat parse, so cycles
/// cannot occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineNode {
    pub title: String,
    /// 1-based target page, when the destination is a plain `#N` page link.
    /// Named or external destinations keep the node but carry no page.
    pub page: Option<u32>,
    pub children: Vec<OutlineNode>,
}

#[derive(Debug, PartialEq)]
enum Token {
    Open,
    Close,
    Atom(String),
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '"' => {
                let mut value = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some(other) => value.push(other),
                            None => break,
                        },
                        other => value.push(other),
                    }
                }
                tokens.push(Token::Atom(value));
            }
            c if c.is_whitespace() => {}
            c => {
                // bare symbol, e.g. the leading `bookmarks`
                let mut value = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || next == '(' || next == ')' {
                        break;
                    }
                    value.push(next);
                    chars.next();
                }
                tokens.push(Token::Atom(value));
            }
        }
    }
    tokens
}

/// Parse the outline text into a list of root nodes. Empty input, a bare
/// `(bookmarks)`, and garbage all produce an empty list.
pub fn parse_outline(text: &str) -> Vec<OutlineNode> {
    let tokens = tokenize(text);
    let mut iter = tokens.into_iter().peekable();

    if iter.next() != Some(Token::Open) {
        return Vec::new();
    }
    match iter.next() {
        Some(Token::Atom(sym)) if sym == "bookmarks" => {}
        _ => return Vec::new(),
    }
    parse_siblings(&mut iter)
}

fn parse_siblings(
    iter: &mut std::iter::Peekable<std::vec::IntoIter<Token>>,
) -> Vec<OutlineNode> {
    let mut nodes = Vec::new();
    loop {
        match iter.next() {
            Some(Token::Open) => {
                if let Some(node) = parse_node(iter) {
                    nodes.push(node);
                }
            }
            // end of this sibling list, or truncated input
            Some(Token::Close) | None => return nodes,
            Some(Token::Atom(_)) => {}
        }
    }
}

/// Parse one `("title" "url" children...)` form; the opening paren has
/// already been consumed.
fn parse_node(iter: &mut std::iter::Peekable<std::vec::IntoIter<Token>>) -> Option<OutlineNode> {
    let title = match iter.next() {
        Some(Token::Atom(title)) => title,
        // not a node; skip to the matching close
        _ => {
            skip_form(iter);
            return None;
        }
    };
    let page = match iter.peek() {
        Some(Token::Atom(_)) => {
            let Some(Token::Atom(url)) = iter.next() else {
                unreachable!()
            };
            parse_page_url(&url)
        }
        _ => None,
    };
    let children = parse_siblings(iter);
    Some(OutlineNode {
        title,
        page,
        children,
    })
}

/// Consume tokens up to and including the close paren of the current form.
fn skip_form(iter: &mut std::iter::Peekable<std::vec::IntoIter<Token>>) {
    let mut depth = 1;
    for token in iter {
        match token {
            Token::Open => depth += 1,
            Token::Close => {
                depth -= 1;
                if depth == 0 {
                    return;
                }
            }
            Token::Atom(_) => {}
        }
    }
}

/// `#12` -> page 12. Anything else (named components, external URLs) is a
/// destination this pipeline cannot map to a page.
fn parse_page_url(url: &str) -> Option<u32> {
    let number = url.strip_prefix('#')?;
    match number.parse::<u32>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    }
}
