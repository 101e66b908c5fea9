use std::sync::OnceLock;

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
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;

pub const TIMEZONE_ENV_VAR: &str =
  "SNAPPLAN_TIMEZONE";

/// Resolves the zone used to cut
/// timestamps into calendar days.
///
/// `SNAPPLAN_TIMEZONE` wins over the
/// configured value; anything
/// unparseable falls back to UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config")
  {
    return tz;
  }

  chrono_tz::UTC
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

#[must_use]
pub fn calendar_day(
  dt: DateTime<Utc>,
  tz: &Tz
) -> NaiveDate {
  dt.with_timezone(tz).date_naive()
}

/// Whole calendar days from
/// `reference` to `due`; negative
/// when `due` is in the past.
#[must_use]
pub fn days_until(
  due: DateTime<Utc>,
  reference: DateTime<Utc>,
  tz: &Tz
) -> i64 {
  calendar_day(due, tz)
    .signed_duration_since(
      calendar_day(reference, tz)
    )
    .num_days()
}

/// The text a due date is searched
/// by: `YYYY-MM-DD` of its calendar
/// day.
#[must_use]
pub fn day_text(
  dt: DateTime<Utc>,
  tz: &Tz
) -> String {
  calendar_day(dt, tz)
    .format("%Y-%m-%d")
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
         exist in configured \
         timezone: {context}"
      ))
    }
  }
}

fn start_of_day(
  date: NaiveDate,
  tz: &Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for {context}"
      )
    })?;
  to_utc_from_local(
    midnight, tz, context
  )
}

fn relative_regex()
-> anyhow::Result<&'static Regex> {
  static RELATIVE_RE: OnceLock<
    Regex
  > = OnceLock::new();
  if let Some(re) = RELATIVE_RE.get() {
    return Ok(re);
  }
  let re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;
  Ok(RELATIVE_RE.get_or_init(|| re))
}

/// Parses a due date expression:
/// `now`, `today`, `tomorrow`,
/// `yesterday`, `YYYY-MM-DD`, or a
/// signed day/week offset such as
/// `+3d` or `-1w`.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_due_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today = calendar_day(now, tz);

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return start_of_day(
        today, tz, "today"
      );
    }
    | "tomorrow" => {
      return start_of_day(
        today + Duration::days(1),
        tz,
        "tomorrow"
      );
    }
    | "yesterday" => {
      return start_of_day(
        today - Duration::days(1),
        tz,
        "yesterday"
      );
    }
    | _ => {}
  }

  if let Some(caps) =
    relative_regex()?.captures(token)
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

    let days = match unit {
      | "d" => num,
      | "w" => num
        .checked_mul(7)
        .ok_or_else(|| {
          anyhow!(
            "relative offset out of \
             range: {token}"
          )
        })?,
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ));
      }
    };
    let offset = Duration::try_days(
      days
    )
    .ok_or_else(|| {
      anyhow!(
        "relative offset out of \
         range: {token}"
      )
    })?;
    let target = if sign == "-" {
      today.checked_sub_signed(offset)
    } else {
      today.checked_add_signed(offset)
    }
    .ok_or_else(|| {
      anyhow!(
        "relative date out of range: \
         {token}"
      )
    })?;

    return start_of_day(
      target, tz, "relative"
    );
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return start_of_day(
      date, tz, "date"
    );
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  Err(anyhow!(
    "unrecognized due date: {token} \
     (expected today|tomorrow|\
     yesterday|YYYY-MM-DD|+Nd|+Nw)"
  ))
}
