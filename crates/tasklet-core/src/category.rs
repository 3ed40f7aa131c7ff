use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{
  TaskError,
  TaskResult
};

pub const PREDEFINED_CATEGORIES:
  [&str; 3] =
  ["Work", "Home", "Personal"];

/// Label an uncategorised task is
/// matched and displayed under.
pub const NO_CATEGORY_LABEL: &str =
  "No category";

#[derive(Debug, Clone)]
pub struct CategoryRegistry {
  predefined: Vec<String>
}

impl Default for CategoryRegistry {
  fn default() -> Self {
    Self::new(
      PREDEFINED_CATEGORIES
        .iter()
        .map(ToString::to_string)
        .collect()
    )
  }
}

impl CategoryRegistry {
  pub fn new(
    predefined: Vec<String>
  ) -> Self {
    Self {
      predefined
    }
  }

  pub fn is_predefined(
    &self,
    name: &str
  ) -> bool {
    self
      .predefined
      .iter()
      .any(|p| same_category(p, name))
  }

  /// Predefined and user categories,
  /// deduplicated ignoring case with
  /// the first spelling kept, in plain
  /// string order (uppercase first).
  pub fn all(
    &self,
    user: &BTreeSet<String>
  ) -> Vec<String> {
    let mut out: Vec<String> =
      Vec::new();
    for name in
      self.predefined.iter().chain(user)
    {
      if out
        .iter()
        .any(|seen| {
          same_category(seen, name)
        })
      {
        continue;
      }
      out.push(name.clone());
    }
    out.sort();
    out
  }

  #[tracing::instrument(skip(
    self, user
  ))]
  pub fn add(
    &self,
    name: &str,
    user: &mut BTreeSet<String>
  ) -> TaskResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
      return Err(
        TaskError::validation(
          "category name must not be \
           blank"
        )
      );
    }
    if self.is_predefined(trimmed) {
      return Err(
        TaskError::validation(
          format!(
            "category '{trimmed}' is \
             predefined"
          )
        )
      );
    }
    if user.iter().any(|existing| {
      same_category(existing, trimmed)
    }) {
      return Err(
        TaskError::validation(
          format!(
            "category '{trimmed}' \
             already exists"
          )
        )
      );
    }

    debug!(category = %trimmed, "adding user category");
    user.insert(trimmed.to_string());
    Ok(trimmed.to_string())
  }

  /// Removes every user entry equal to
  /// `name` ignoring case. Predefined
  /// names are left alone.
  #[tracing::instrument(skip(
    self, user
  ))]
  pub fn remove(
    &self,
    name: &str,
    user: &mut BTreeSet<String>
  ) -> bool {
    if self.is_predefined(name) {
      debug!(category = %name, "ignoring removal of predefined category");
      return false;
    }
    let before = user.len();
    user.retain(|existing| {
      !same_category(existing, name)
    });
    before != user.len()
  }
}

pub fn same_category(
  a: &str,
  b: &str
) -> bool {
  a.to_lowercase() == b.to_lowercase()
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use super::CategoryRegistry;
  use crate::error::TaskError;

  fn user(
    names: &[&str]
  ) -> BTreeSet<String> {
    names
      .iter()
      .map(ToString::to_string)
      .collect()
  }

  #[test]
  fn merges_dedupes_and_sorts() {
    let registry =
      CategoryRegistry::default();
    let all = registry.all(&user(&[
      "work", "garden", "Bills"
    ]));
    assert_eq!(all, vec![
      "Bills", "Home", "Personal",
      "Work", "garden"
    ]);
  }

  #[test]
  fn lowercase_user_category_sorts_after_capitalised()
  {
    let registry =
      CategoryRegistry::default();
    let all = registry
      .all(&user(&["garden", "Bills"]));
    assert_eq!(
      all.last().map(String::as_str),
      Some("garden")
    );
    assert_eq!(
      all.first().map(String::as_str),
      Some("Bills")
    );
  }

  #[test]
  fn add_rejects_predefined_in_any_case()
  {
    let registry =
      CategoryRegistry::default();
    let mut set = user(&[]);
    let err = registry
      .add("work", &mut set)
      .expect_err("predefined");
    assert!(matches!(
      err,
      TaskError::Validation(_)
    ));
    assert!(
      registry
        .add("Home", &mut set)
        .is_err()
    );
    assert!(
      registry
        .add("home", &mut set)
        .is_err()
    );
    assert!(set.is_empty());
  }

  #[test]
  fn add_rejects_user_duplicate_and_blank()
  {
    let registry =
      CategoryRegistry::default();
    let mut set = user(&[]);
    assert_eq!(
      registry
        .add("  Garden ", &mut set)
        .expect("new category"),
      "Garden"
    );
    assert!(
      registry
        .add("garden", &mut set)
        .is_err()
    );
    assert!(
      registry
        .add("   ", &mut set)
        .is_err()
    );
    assert_eq!(set, user(&["Garden"]));
  }

  #[test]
  fn remove_ignores_predefined() {
    let registry =
      CategoryRegistry::default();
    let mut set =
      user(&["Garden", "Bills"]);
    assert!(
      !registry
        .remove("WORK", &mut set)
    );
    assert!(
      registry
        .remove("garden", &mut set)
    );
    assert_eq!(set, user(&["Bills"]));
  }
}
