//! Message template rendering: `{{ .Field }}`-style substitution over the
//! sample context plus `target_name`/`instance_name`.
//!
//! Hand-rolled rather than a general template engine: the grammar is a
//! single substitution form, and an unresolvable token must degrade to
//! verbatim rather than error — never fail the alert (`SPEC_FULL.md` §4.5.2).

use crate::alerts::condition::Variable;
use crate::model::Sample;

/// Render `template` against `sample`/`target_name`/`instance_name`.
/// Unknown `{{ .Field }}` tokens are left verbatim.
pub fn render(template: &str, target_name: &str, instance_name: &str, sample: &Sample) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let Some(start) = rest.find("{{") else {
            out.push_str(rest);
            break;
        };
        let Some(end_rel) = rest[start..].find("}}") else {
            // Unterminated token: emit the remainder verbatim.
            out.push_str(rest);
            break;
        };
        let end = start + end_rel;

        out.push_str(&rest[..start]);
        let token = rest[start + 2..end].trim();
        out.push_str(&resolve(token, target_name, instance_name, sample));

        rest = &rest[end + 2..];
    }

    out
}

fn resolve(token: &str, target_name: &str, instance_name: &str, sample: &Sample) -> String {
    let Some(field) = token.strip_prefix('.') else {
        return format!("{{{{ {token} }}}}");
    };

    match field {
        "TargetName" | "target_name" => return target_name.to_string(),
        "InstanceName" | "instance_name" => return instance_name.to_string(),
        _ => {}
    }

    // Title-case-insensitive lookup against the rule variable catalogue
    // (".Usage" resolves the same variable "usage" resolves in a condition).
    for variable in [
        Variable::Usage,
        Variable::Active,
        Variable::Idle,
        Variable::Pending,
        Variable::Max,
        Variable::Timeout,
        Variable::HeapUsage,
        Variable::HeapUsed,
        Variable::HeapMax,
        Variable::NonHeapUsed,
        Variable::Cpu,
        Variable::Threads,
        Variable::GcCount,
        Variable::GcTime,
    ] {
        let normalized: String = field.chars().filter(|c| *c != '_').collect::<String>().to_lowercase();
        let canonical: String = variable.canonical().chars().filter(|c| *c != '_').collect();
        if normalized == canonical {
            return format!("{:.2}", variable.extract(sample));
        }
    }

    // Unresolvable token: emit verbatim, never fail the alert.
    format!("{{{{ {token} }}}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> Sample {
        Sample {
            ts: Utc::now(),
            active: 9,
            idle: 1,
            pending: 0,
            max: 10,
            timeout_count: 0,
            acquire_p99_seconds: 0.0,
            heap_used: 80,
            heap_max: 100,
            nonheap_used: 0,
            threads_live: 12,
            cpu_usage_ratio: 0.5,
            gc_count: 3,
            gc_total_seconds: 1.2,
        }
    }

    #[test]
    fn substitutes_known_fields() {
        let rendered = render(
            "{{ .TargetName }}/{{ .InstanceName }}: usage is {{ .Usage }}%",
            "orders-db",
            "default",
            &sample(),
        );
        assert_eq!(rendered, "orders-db/default: usage is 90.00%");
    }

    #[test]
    fn leaves_unresolvable_token_verbatim() {
        let rendered = render("value: {{ .Bogus }}", "t", "i", &sample());
        assert_eq!(rendered, "value: {{ .Bogus }}");
    }

    #[test]
    fn leaves_unterminated_token_verbatim_and_does_not_panic() {
        let rendered = render("oops {{ .Usage", "t", "i", &sample());
        assert_eq!(rendered, "oops {{ .Usage");
    }

    #[test]
    fn plain_text_without_tokens_is_unchanged() {
        assert_eq!(render("no tokens here", "t", "i", &sample()), "no tokens here");
    }
}
