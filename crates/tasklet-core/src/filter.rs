use tracing::trace;

use crate::category::{
  NO_CATEGORY_LABEL,
  same_category
};
use crate::settings::AppSettings;
use crate::task::Task;
use crate::view::ViewState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pred {
  OnlyHidden,
  NotHidden,
  NotCompleted,
  CategoryIn(Vec<String>),
  TextContains(String)
}

/// Conjunction of predicates in
/// visibility, category, search order.
#[derive(Debug, Clone, Default)]
pub struct Filter {
  preds: Vec<Pred>
}

impl Filter {
  pub fn from_view(
    view: &ViewState,
    settings: &AppSettings
  ) -> Self {
    let mut preds = Vec::new();

    if view.show_only_hidden {
      preds.push(Pred::OnlyHidden);
    } else {
      preds.push(Pred::NotHidden);
      if settings.hide_completed_tasks {
        preds.push(Pred::NotCompleted);
      }
    }

    if !view.category_filters.is_empty()
    {
      preds.push(Pred::CategoryIn(
        view
          .category_filters
          .iter()
          .cloned()
          .collect()
      ));
    }

    // Blank text disables search; any
    // other text is matched verbatim.
    if !view.search.trim().is_empty() {
      preds.push(Pred::TextContains(
        view.search.to_lowercase()
      ));
    }

    Self {
      preds
    }
  }

  pub fn preds(&self) -> &[Pred] {
    &self.preds
  }

  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    self
      .preds
      .iter()
      .all(|pred| eval_pred(pred, task))
  }
}

fn eval_pred(
  pred: &Pred,
  task: &Task
) -> bool {
  let ok = match pred {
    | Pred::OnlyHidden => {
      task.is_individually_hidden
    }
    | Pred::NotHidden => {
      !task.is_individually_hidden
    }
    | Pred::NotCompleted => {
      !task.is_completed
    }
    | Pred::CategoryIn(filters) => {
      let label = task
        .category
        .as_deref()
        .unwrap_or(NO_CATEGORY_LABEL);
      filters.iter().any(|wanted| {
        same_category(wanted, label)
      })
    }
    | Pred::TextContains(needle) => {
      task
        .title
        .to_lowercase()
        .contains(needle.as_str())
        || task
          .description
          .as_deref()
          .map(|text| {
            text
              .to_lowercase()
              .contains(needle.as_str())
          })
          .unwrap_or(false)
    }
  };

  trace!(pred = ?pred, id = task.id, ok, "filter predicate evaluation");
  ok
}
