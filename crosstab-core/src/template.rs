//! Positional text templates.
//!
//! `%s` takes the next argument as text, `%d` takes the next argument and
//! requires it to be an integer, `%%` is a literal percent sign. Extra
//! arguments are ignored. Anything else is a malformed template.

use std::fmt::Write;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Text(&'a str),
    Int(i64),
}

pub fn render(template: &str, args: &[Arg<'_>]) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut next = 0;
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let directive = chars.next().ok_or_else(|| CoreError::DanglingPercent {
            template: template.to_string(),
        })?;
        match directive {
            '%' => out.push('%'),
            's' | 'd' => {
                let arg = args.get(next).ok_or_else(|| CoreError::MissingArgument {
                    template: template.to_string(),
                    index: next,
                })?;
                match (directive, arg) {
                    (_, Arg::Int(n)) => {
                        let _ = write!(out, "{n}");
                    }
                    ('s', Arg::Text(s)) => out.push_str(s),
                    _ => {
                        return Err(CoreError::NotAnInteger {
                            template: template.to_string(),
                            index: next,
                        });
                    }
                }
                next += 1;
            }
            found => {
                return Err(CoreError::UnsupportedPlaceholder {
                    template: template.to_string(),
                    found,
                });
            }
        }
    }

    Ok(out)
}
