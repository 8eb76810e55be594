use crate::error::{Error, Result};
use crate::node::Node;

/// Block prefixes that carry no file references and are dropped during
/// tokenization (viewer layout, layer declarations).
const INVALID_PREFIXES: &[&str] = &["add_layer", "define_window_layout"];

/// Tokenizer state for [`Blocks`].
enum State {
    Outside,
    InBlock { depth: i32 },
}

/// Lazy iterator over top-level bracket-delimited blocks of a scene.
///
/// Lines are accumulated once a `{` is seen and a block is emitted when
/// the running brace count returns to zero. A `}` with no matching open
/// is a parse error. Brace characters inside quoted knob values count
/// toward the depth the same as structural braces; the scene format does
/// not distinguish them and authored scenes keep quoted braces balanced.
pub struct Blocks<'a> {
    lines: std::str::SplitInclusive<'a, char>,
    state: State,
    buf: String,
}

impl<'a> Blocks<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.split_inclusive('\n'),
            state: State::Outside,
            buf: String::new(),
        }
    }
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            let opens = line.matches('{').count() as i32;
            let closes = line.matches('}').count() as i32;

            // Skip lines until one opens a block; a close with no open
            // pending is unbalanced
            if matches!(self.state, State::Outside) {
                if opens == 0 {
                    if closes > 0 {
                        return Some(Err(Error::Parse(
                            "unmatched closing brace in scene text".to_string(),
                        )));
                    }
                    continue;
                }
                self.state = State::InBlock { depth: 0 };
            }

            let State::InBlock { depth } = &mut self.state else {
                unreachable!()
            };

            *depth += opens;
            *depth -= closes;
            if *depth < 0 {
                return Some(Err(Error::Parse(
                    "unmatched closing brace in scene text".to_string(),
                )));
            }

            self.buf.push_str(line);

            if *depth == 0 {
                let block = std::mem::take(&mut self.buf);
                self.state = State::Outside;

                if INVALID_PREFIXES.iter().any(|p| block.starts_with(p)) {
                    continue;
                }
                return Some(Ok(block));
            }
        }
        // An unterminated trailing block is dropped, matching the
        // forgiving read behavior of the line-oriented format.
        None
    }
}

/// Parse full scene text into nodes.
pub fn parse_scene(text: &str) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    for block in Blocks::new(text) {
        nodes.push(Node::from_block(block?)?);
    }
    Ok(nodes)
}
