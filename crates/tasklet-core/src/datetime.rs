use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeDelta,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;

pub const DEFAULT_TIMEZONE: &str =
  "UTC";

pub fn parse_timezone(
  raw: &str
) -> anyhow::Result<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Err(anyhow!(
      "timezone must not be empty"
    ));
  }
  trimmed.parse::<Tz>().map_err(|err| {
    anyhow!(
      "unknown timezone '{trimmed}': \
       {err}"
    )
  })
}

#[must_use]
pub fn format_local(
  dt: DateTime<Utc>,
  tz: &Tz
) -> String {
  dt.with_timezone(tz)
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: &Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in timezone {tz}: \
         {context}"
      ))
    }
  }
}

/// Parses a due-time expression
/// relative to `now`, reading wall
/// clock values in `tz`.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      let midnight = now
        .with_timezone(tz)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| {
          anyhow!(
            "failed to construct \
             midnight for today"
          )
        })?;
      return to_utc_from_local(
        midnight, tz, "today"
      );
    }
    | "tomorrow" => {
      let today = parse_date_expr(
        "today", now, tz
      )?;
      return Ok(
        today + Duration::days(1)
      );
    }
    | _ => {}
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let local_now =
      now.with_timezone(tz);
    let mut day =
      local_now.date_naive();
    let candidate = day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct clock \
           time candidate"
        )
      })?;
    if candidate
      <= local_now.naive_local()
    {
      day = day
        .checked_add_signed(
          Duration::days(1)
        )
        .ok_or_else(|| {
          anyhow!(
            "failed to advance to \
             next day"
          )
        })?;
    }
    let next_candidate = day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct next \
           clock time candidate"
        )
      })?;
    return to_utc_from_local(
      next_candidate,
      tz,
      "clock-time"
    );
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let duration = match unit {
      | "d" => TimeDelta::try_days(num),
      | "h" => TimeDelta::try_hours(num),
      | "m" => {
        TimeDelta::try_minutes(num)
      }
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ));
      }
    }
    .ok_or_else(|| {
      anyhow!(
        "relative date out of range: \
         {token}"
      )
    })?;

    let shifted = if sign == "-" {
      now.checked_sub_signed(duration)
    } else {
      now.checked_add_signed(duration)
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "relative date out of range: \
         {token}"
      )
    });
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    let midnight = date
      .and_hms_opt(0, 0, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct \
           midnight for date"
        )
      })?;
    return to_utc_from_local(
      midnight, tz, "date"
    );
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        ndt, tz, fmt
      );
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow, clock times \
     (e.g. 3:23pm or 15:23), \
     +Nd/+Nh/+Nm, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM"
  })
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm_match
      .as_str()
      .to_ascii_lowercase()
      .as_str()
    {
      | "am" => raw_hour % 12,
      | "pm" => raw_hour % 12 + 12,
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    TimeZone,
    Utc
  };

  use super::{
    format_local,
    parse_date_expr,
    parse_timezone
  };

  fn now() -> chrono::DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 17, 23, 0, 0
      )
      .single()
      .expect("valid now")
  }

  #[test]
  fn relative_offsets() {
    let tz = parse_timezone("UTC")
      .expect("utc");
    assert_eq!(
      parse_date_expr("+90m", now(), &tz)
        .expect("relative"),
      now() + Duration::minutes(90)
    );
    assert_eq!(
      parse_date_expr("-1d", now(), &tz)
        .expect("relative"),
      now() - Duration::days(1)
    );
  }

  #[test]
  fn huge_relative_offset_is_an_error()
  {
    let tz = parse_timezone("UTC")
      .expect("utc");
    let err = parse_date_expr(
      "+200000000d",
      now(),
      &tz
    )
    .expect_err("out of range");
    assert!(
      err
        .to_string()
        .contains("out of range")
    );
    assert!(
      parse_date_expr(
        "-9999999999999m",
        now(),
        &tz
      )
      .is_err()
    );
  }

  #[test]
  fn clock_time_rolls_to_next_day() {
    let tz =
      parse_timezone("Europe/Warsaw")
        .expect("warsaw");
    let parsed =
      parse_date_expr("3:23pm", now(), &tz)
        .expect("parse clock time");
    assert_eq!(
      format_local(parsed, &tz),
      "2026-02-18 15:23"
    );
  }

  #[test]
  fn local_datetime_uses_timezone() {
    let tz =
      parse_timezone("Europe/Warsaw")
        .expect("warsaw");
    let parsed = parse_date_expr(
      "2026-03-01 09:30",
      now(),
      &tz
    )
    .expect("parse local");
    assert_eq!(
      parsed,
      Utc
        .with_ymd_and_hms(
          2026, 3, 1, 8, 30, 0
        )
        .single()
        .expect("utc")
    );
  }

  #[test]
  fn rejects_garbage() {
    let tz = parse_timezone("UTC")
      .expect("utc");
    assert!(
      parse_date_expr(
        "someday", now(), &tz
      )
      .is_err()
    );
    assert!(
      parse_timezone("Mars/Olympus")
        .is_err()
    );
  }
}
