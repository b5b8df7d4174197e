//! Input validation. Checks shape and field constraints of a raw request and
//! normalizes it. Collects every offending field before failing.
//!
//! Pure: no I/O, no platform calls.

use crate::domain::{
    ActivityFields, CourseFields, EditionFields, FieldIssue, Notifications, RawRequest, Schedule,
    StudentIdentity, ValidatedRequest, ValidationError, canonical_name,
};
use chrono::{Days, Months, NaiveDate, NaiveTime};
use serde_json::{Map, Value};
use std::collections::HashMap;

const NAME_MAX: usize = 200;
const TEXT_MAX: usize = 4000;
const SHORT_MAX: usize = 120;
const MAX_DURATION_DAYS: u32 = 366;
const MAX_EXPECTED_HOURS: u32 = 24;
const MAX_BATCH: usize = 500;

/// Months between publication start and edition start.
const PUBLICATION_LEAD_MONTHS: u32 = 2;

/// Validate and normalize a request.
pub fn validate(request: &RawRequest) -> Result<ValidatedRequest, ValidationError> {
    let mut issues = Issues::default();
    let root = Scope::root(&request.fields);

    let kind = request.kind.trim().to_ascii_lowercase();
    if kind != "enrollment" && request.batch.is_some() {
        issues.push("batch", "is only supported for enrollment requests");
    }

    let validated = match kind.as_str() {
        "course" => course(&root, &mut issues),
        "edition" => edition(&root, &mut issues),
        "activity" => activity(&root, &mut issues),
        "enrollment" => enrollment(&root, request.batch.as_deref(), &mut issues),
        "" => {
            issues.push("kind", "is required");
            None
        }
        other => {
            issues.push(
                "kind",
                format!(
                    "'{}' is not one of course, edition, activity, enrollment",
                    other
                ),
            );
            None
        }
    };

    match validated {
        Some(request) if issues.is_empty() => Ok(request),
        _ => Err(issues.into_error()),
    }
}

fn course(s: &Scope<'_>, issues: &mut Issues) -> Option<ValidatedRequest> {
    let name = s.text("name", TextRule::line(NAME_MAX), issues);
    let description = s.text("description", TextRule::block(TEXT_MAX), issues);
    let programme = s.text("programme", TextRule::block(TEXT_MAX).optional(), issues);
    let publication_date = s.date("publicationDate", false, issues);

    Some(ValidatedRequest::Course(CourseFields {
        name: name?,
        description: description?,
        programme,
        publication_date,
    }))
}

fn edition(s: &Scope<'_>, issues: &mut Issues) -> Option<ValidatedRequest> {
    let course_ref = s.text("courseRef", TextRule::line(NAME_MAX), issues);
    let start_date = s.date("startDate", true, issues);
    let duration_days = s.positive_int("durationDays", MAX_DURATION_DAYS, true, issues);
    let title = s.text("title", TextRule::line(NAME_MAX).optional(), issues);
    let description = s.text("description", TextRule::block(TEXT_MAX).optional(), issues);
    let location = s.text("location", TextRule::line(SHORT_MAX).optional(), issues);
    let supplier = s.text("supplier", TextRule::line(SHORT_MAX).optional(), issues);
    let price = s.text("price", TextRule::line(SHORT_MAX).optional(), issues);
    let language = s.text("language", TextRule::line(SHORT_MAX).optional(), issues);

    let mut activities = Vec::new();
    if let Some(items) = s.array("activities", false, issues) {
        for (i, item) in items.iter().enumerate() {
            let path = format!("{}[{}]", s.path("activities"), i);
            match item.as_object() {
                Some(map) => {
                    if let Some(a) = activity_fields(&Scope::nested(map, path), issues) {
                        activities.push((i, a));
                    }
                }
                None => issues.push(path, "must be an object"),
            }
        }
    }

    let start_date = start_date?;
    let duration_days = duration_days?;
    let end_date = start_date.checked_add_days(Days::new(u64::from(duration_days) - 1));
    let publication_start = start_date.checked_sub_months(Months::new(PUBLICATION_LEAD_MONTHS));
    let publication_end = end_date.and_then(|d| d.checked_add_days(Days::new(1)));
    let (Some(end_date), Some(publication_start), Some(publication_end)) =
        (end_date, publication_start, publication_end)
    else {
        issues.push(s.path("startDate"), "is out of the supported date range");
        return None;
    };

    for (i, a) in &activities {
        if a.schedule.date < start_date || a.schedule.date > end_date {
            issues.push(
                format!("{}[{}].schedule.date", s.path("activities"), i),
                format!(
                    "must fall within the edition dates {} to {}",
                    start_date, end_date
                ),
            );
        }
    }

    // Bound last: the checks above need only the dates.
    let course_ref = course_ref?;
    let title = title
        .unwrap_or_else(|| format!("{}-{}", course_ref, start_date.format("%d/%m/%Y")));

    Some(ValidatedRequest::Edition {
        course_ref,
        fields: EditionFields {
            title,
            start_date,
            duration_days,
            end_date,
            publication_start,
            publication_end,
            description,
            location,
            supplier,
            price,
            language,
        },
        activities: activities.into_iter().map(|(_, a)| a).collect(),
    })
}

fn activity(s: &Scope<'_>, issues: &mut Issues) -> Option<ValidatedRequest> {
    let edition_ref = s.text("editionRef", TextRule::line(NAME_MAX), issues);
    let fields = activity_fields(s, issues);
    Some(ValidatedRequest::Activity {
        edition_ref: edition_ref?,
        fields: fields?,
    })
}

fn activity_fields(s: &Scope<'_>, issues: &mut Issues) -> Option<ActivityFields> {
    let name = s.text("name", TextRule::line(NAME_MAX), issues);
    let schedule = match s.object("schedule", true, issues) {
        Some(map) => schedule(&Scope::nested(map, s.path("schedule")), issues),
        None => None,
    };
    let description = s.text("description", TextRule::block(TEXT_MAX).optional(), issues);
    let expected_hours = s.positive_int("expectedHours", MAX_EXPECTED_HOURS, false, issues);

    Some(ActivityFields {
        name: name?,
        schedule: schedule?,
        description,
        expected_hours,
    })
}

fn schedule(s: &Scope<'_>, issues: &mut Issues) -> Option<Schedule> {
    let date = s.date("date", true, issues);
    let start_time = s.time("startTime", issues);
    let end_time = s.time("endTime", issues);
    let (start_time, end_time) = (start_time?, end_time?);
    if end_time <= start_time {
        issues.push(s.path("endTime"), "must be after startTime");
        return None;
    }
    Some(Schedule {
        date: date?,
        start_time,
        end_time,
    })
}

fn enrollment(
    s: &Scope<'_>,
    batch: Option<&[Value]>,
    issues: &mut Issues,
) -> Option<ValidatedRequest> {
    let activity_ref = s.text("activityRef", TextRule::line(NAME_MAX), issues);
    let online = s.flag("notifyOnline", true, issues);
    let in_person = s.flag("notifyInPerson", true, issues);
    if !online && !in_person {
        issues.push(
            s.path("notifyOnline"),
            "at least one of notifyOnline, notifyInPerson must be true",
        );
    }

    // (path, value) for every submitted student, from `fields.students` then `batch`.
    let mut entries: Vec<(String, &Value)> = Vec::new();
    if let Some(items) = s.array("students", false, issues) {
        for (i, v) in items.iter().enumerate() {
            entries.push((format!("{}[{}]", s.path("students"), i), v));
        }
    }
    for (i, v) in batch.unwrap_or_default().iter().enumerate() {
        match v {
            Value::Object(map) => match map.get("student") {
                Some(student) => entries.push((format!("batch[{}].student", i), student)),
                None => issues.push(format!("batch[{}].student", i), "is required"),
            },
            other => entries.push((format!("batch[{}]", i), other)),
        }
    }

    if entries.is_empty() {
        issues.push(s.path("students"), "must list at least one student");
    } else if entries.len() > MAX_BATCH {
        issues.push(
            s.path("students"),
            format!("must list at most {} students per batch", MAX_BATCH),
        );
    }

    let mut students = Vec::with_capacity(entries.len());
    let mut seen: HashMap<String, String> = HashMap::new();
    for (path, value) in entries {
        let Some(student) = TextRule::line(NAME_MAX).apply(&path, Some(value), issues) else {
            continue;
        };
        match seen.get(&canonical_name(&student)) {
            Some(first) => issues.push(path, format!("duplicates {}", first)),
            None => {
                seen.insert(canonical_name(&student), path);
                students.push(StudentIdentity::new(student));
            }
        }
    }

    Some(ValidatedRequest::Enrollment {
        activity_ref: activity_ref?,
        students,
        notifications: Notifications { online, in_person },
    })
}

#[derive(Default)]
struct Issues(Vec<FieldIssue>);

impl Issues {
    fn push(&mut self, field: impl Into<String>, problem: impl Into<String>) {
        self.0.push(FieldIssue::new(field, problem));
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn into_error(mut self) -> ValidationError {
        if self.0.is_empty() {
            self.push("fields", "are incomplete");
        }
        ValidationError { issues: self.0 }
    }
}

#[derive(Clone, Copy)]
struct TextRule {
    max: usize,
    required: bool,
    /// Block text keeps line breaks; line text is collapsed to single spaces.
    multiline: bool,
}

impl TextRule {
    fn line(max: usize) -> Self {
        Self {
            max,
            required: true,
            multiline: false,
        }
    }

    fn block(max: usize) -> Self {
        Self {
            max,
            required: true,
            multiline: true,
        }
    }

    fn optional(self) -> Self {
        Self {
            required: false,
            ..self
        }
    }

    fn apply(&self, path: &str, value: Option<&Value>, issues: &mut Issues) -> Option<String> {
        let raw = match value {
            None | Some(Value::Null) => {
                if self.required {
                    issues.push(path, "is required");
                }
                return None;
            }
            Some(Value::String(s)) => s,
            Some(_) => {
                issues.push(path, "must be a string");
                return None;
            }
        };
        let text = if self.multiline {
            raw.trim().to_string()
        } else {
            raw.split_whitespace().collect::<Vec<_>>().join(" ")
        };
        if text.is_empty() {
            if self.required {
                issues.push(path, "must not be blank");
            }
            return None;
        }
        if text.chars().count() > self.max {
            issues.push(path, format!("must be at most {} characters", self.max));
            return None;
        }
        Some(text)
    }
}

/// A JSON object being validated, with the dotted path used in issue reports.
struct Scope<'a> {
    map: &'a Map<String, Value>,
    prefix: String,
}

impl<'a> Scope<'a> {
    fn root(map: &'a Map<String, Value>) -> Self {
        Self {
            map,
            prefix: String::new(),
        }
    }

    fn nested(map: &'a Map<String, Value>, prefix: String) -> Self {
        Self { map, prefix }
    }

    fn path(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.map.get(name).filter(|v| !v.is_null())
    }

    fn text(&self, name: &str, rule: TextRule, issues: &mut Issues) -> Option<String> {
        rule.apply(&self.path(name), self.get(name), issues)
    }

    fn date(&self, name: &str, required: bool, issues: &mut Issues) -> Option<NaiveDate> {
        let rule = if required {
            TextRule::line(SHORT_MAX)
        } else {
            TextRule::line(SHORT_MAX).optional()
        };
        let raw = self.text(name, rule, issues)?;
        let parsed = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(&raw, "%d/%m/%Y"));
        match parsed {
            Ok(d) => Some(d),
            Err(_) => {
                issues.push(self.path(name), "must be a date (YYYY-MM-DD)");
                None
            }
        }
    }

    fn time(&self, name: &str, issues: &mut Issues) -> Option<NaiveTime> {
        let raw = self.text(name, TextRule::line(SHORT_MAX), issues)?;
        match NaiveTime::parse_from_str(&raw, "%H:%M") {
            Ok(t) => Some(t),
            Err(_) => {
                issues.push(self.path(name), "must be a time (HH:MM)");
                None
            }
        }
    }

    fn positive_int(
        &self,
        name: &str,
        max: u32,
        required: bool,
        issues: &mut Issues,
    ) -> Option<u32> {
        let Some(value) = self.get(name) else {
            if required {
                issues.push(self.path(name), "is required");
            }
            return None;
        };
        match value.as_u64() {
            Some(n) if n >= 1 && n <= u64::from(max) => u32::try_from(n).ok(),
            Some(n) if n > u64::from(max) => {
                issues.push(self.path(name), format!("must be at most {}", max));
                None
            }
            _ => {
                issues.push(self.path(name), "must be a positive integer");
                None
            }
        }
    }

    fn flag(&self, name: &str, default: bool, issues: &mut Issues) -> bool {
        match self.get(name) {
            None => default,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                issues.push(self.path(name), "must be true or false");
                default
            }
        }
    }

    fn object(
        &self,
        name: &str,
        required: bool,
        issues: &mut Issues,
    ) -> Option<&'a Map<String, Value>> {
        match self.get(name) {
            None => {
                if required {
                    issues.push(self.path(name), "is required");
                }
                None
            }
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                issues.push(self.path(name), "must be an object");
                None
            }
        }
    }

    fn array(&self, name: &str, required: bool, issues: &mut Issues) -> Option<&'a Vec<Value>> {
        match self.get(name) {
            None => {
                if required {
                    issues.push(self.path(name), "is required");
                }
                None
            }
            Some(Value::Array(items)) => Some(items),
            Some(_) => {
                issues.push(self.path(name), "must be an array");
                None
            }
        }
    }
}
