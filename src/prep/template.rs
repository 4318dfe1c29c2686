//! `{name}` placeholder substitution for tool command lines.
//!
//! Values are shell-quoted as they are inserted. `{{` and `}}` produce
//! literal braces, so templates can still use `${VAR}` in shell code.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Unknown placeholder {{{0}}} in template \"{1}\"")]
    UnknownPlaceholder(String, String),
    #[error("Unclosed placeholder in template \"{0}\"")]
    Unclosed(String),
}

/// Substitute `vars` into `template`.
pub fn render(template: &str, vars: &[(&str, &str)]) -> Result<String, Error> {
    let mut out = String::with_capacity(template.len() * 2);
    expand(template, &mut |name| {
        vars.iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| shell_quote(v))
    }, &mut out)?;
    Ok(out)
}

/// Check that `template` only uses placeholders from `names`.
pub fn validate(template: &str, names: &[&str]) -> Result<(), Error> {
    let mut sink = String::new();
    expand(template, &mut |name| {
        names.contains(&name).then(String::new)
    }, &mut sink)
}

fn expand<F>(template: &str, lookup: &mut F, out: &mut String) -> Result<(), Error>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut rest = template;
    while let Some(i) = rest.find(['{', '}']) {
        out.push_str(&rest[..i]);
        let tail = &rest[i..];
        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            // lone closing brace; copy it through
            out.push('}');
            rest = &tail[1..];
        } else {
            let end = tail
                .find('}')
                .ok_or_else(|| Error::Unclosed(template.to_owned()))?;
            let name = &tail[1..end];
            let value = lookup(name).ok_or_else(|| {
                Error::UnknownPlaceholder(name.to_owned(), template.to_owned())
            })?;
            out.push_str(&value);
            rest = &tail[end + 1..];
        }
    }
    out.push_str(rest);
    Ok(())
}

/// Quote `s` for bash, leaving plain words alone for readability.
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=+@%,".contains(c));
    if plain {
        s.to_owned()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
