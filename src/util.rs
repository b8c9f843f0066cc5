//! Small utility helpers: message templating and answer comparison.

use crate::domain::Participant;

/// Values substituted into message templates.
#[derive(Clone, Debug, Default)]
pub struct Bindings<'a> {
  pub first_name: Option<&'a str>,
  pub last_name: Option<&'a str>,
  pub username: Option<&'a str>,
  pub attempt_count: Option<u32>,
}

impl<'a> Bindings<'a> {
  pub fn for_participant(p: &'a Participant, attempt_count: u32) -> Self {
    Self {
      first_name: Some(p.first_name.as_str()),
      last_name: p.last_name.as_deref(),
      username: p.username.as_deref(),
      attempt_count: Some(attempt_count),
    }
  }
}

const TOKENS: [&str; 4] = ["$firstname", "$lastname", "$username", "$attemptCount"];

/// Replace `$firstname`, `$lastname`, `$username` and `$attemptCount` in `tpl`.
///
/// Matching is literal, and the template is scanned once, so substituted values
/// (which may contain `$` text typed by users) are never expanded again.
/// Missing bindings render as an empty string.
pub fn render_template(tpl: &str, b: &Bindings<'_>) -> String {
  let mut out = String::with_capacity(tpl.len());
  let mut rest = tpl;
  while let Some(pos) = rest.find('$') {
    out.push_str(&rest[..pos]);
    let tail = &rest[pos..];
    match TOKENS.iter().find(|t| tail.starts_with(**t)) {
      Some(token) => {
        push_binding(&mut out, token, b);
        rest = &tail[token.len()..];
      }
      None => {
        out.push('$');
        rest = &tail[1..];
      }
    }
  }
  out.push_str(rest);
  out
}

fn push_binding(out: &mut String, token: &str, b: &Bindings<'_>) {
  match token {
    "$firstname" => out.push_str(b.first_name.unwrap_or_default()),
    "$lastname" => out.push_str(b.last_name.unwrap_or_default()),
    "$username" => {
      if let Some(u) = b.username.filter(|u| !u.is_empty()) {
        out.push('@');
        out.push_str(u);
      }
    }
    "$attemptCount" => {
      if let Some(n) = b.attempt_count {
        out.push_str(&n.to_string());
      }
    }
    _ => {}
  }
}

/// Compare a submitted answer with the expected one.
pub fn answer_matches(submitted: &str, expected: &str, sensitive_case: bool) -> bool {
  if sensitive_case {
    submitted == expected
  } else {
    submitted.to_lowercase() == expected.to_lowercase()
  }
}

/// Log-safe truncation for user-provided strings.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  match s.char_indices().nth(max) {
    None => s.to_string(),
    Some((idx, _)) => format!("{}… ({} bytes total)", &s[..idx], s.len()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn renders_name_and_username() {
    let b = Bindings { first_name: Some("Ana"), username: Some("ana99"), ..Default::default() };
    assert_eq!(render_template("$firstname $username", &b), "Ana @ana99");
  }

  #[test]
  fn absent_fields_render_empty() {
    let b = Bindings { first_name: Some("Ana"), ..Default::default() };
    assert_eq!(render_template("[$firstname|$lastname|$username|$attemptCount]", &b), "[Ana|||]");
  }

  #[test]
  fn attempt_count_and_repeated_tokens() {
    let p = Participant {
      id: 7,
      first_name: "Bo".into(),
      last_name: Some("Li".into()),
      username: None,
    };
    let b = Bindings::for_participant(&p, 2);
    assert_eq!(
      render_template("$firstname $lastname, $attemptCount left. Bye $firstname", &b),
      "Bo Li, 2 left. Bye Bo"
    );
  }

  #[test]
  fn substituted_values_are_not_expanded_again() {
    let b = Bindings { first_name: Some("$username"), username: Some("x"), ..Default::default() };
    assert_eq!(render_template("hi $firstname", &b), "hi $username");
  }

  #[test]
  fn unknown_dollar_text_is_kept() {
    let b = Bindings::default();
    assert_eq!(render_template("costs $5 or $first", &b), "costs $5 or $first");
  }

  #[test]
  fn case_sensitivity() {
    assert!(answer_matches("ABC", "abc", false));
    assert!(!answer_matches("ABC", "abc", true));
    assert!(answer_matches("abc", "abc", true));
  }

  #[test]
  fn truncation_respects_char_boundaries() {
    assert_eq!(trunc_for_log("abc", 5), "abc");
    assert!(trunc_for_log("ééééé", 2).starts_with("éé…"));
  }
}
