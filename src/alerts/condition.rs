//! The rule condition grammar: `<variable> <op> <number>`.
//!
//! No parser-combinator crate is used here — the grammar is three tokens
//! wide, and nothing in this codebase's ancestry reaches for `nom`/`pest`
//! for anything this small.

use std::fmt;

use crate::model::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    Usage,
    Active,
    Idle,
    Pending,
    Max,
    Timeout,
    HeapUsage,
    HeapUsed,
    HeapMax,
    NonHeapUsed,
    Cpu,
    Threads,
    GcCount,
    GcTime,
}

impl Variable {
    fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw.chars().filter(|c| *c != '_').collect::<String>().to_lowercase();
        Some(match normalized.as_str() {
            "usage" => Variable::Usage,
            "active" => Variable::Active,
            "idle" => Variable::Idle,
            "pending" => Variable::Pending,
            "max" => Variable::Max,
            "timeout" => Variable::Timeout,
            "heapusage" => Variable::HeapUsage,
            "heapused" => Variable::HeapUsed,
            "heapmax" => Variable::HeapMax,
            "nonheapused" => Variable::NonHeapUsed,
            "cpu" => Variable::Cpu,
            "threads" => Variable::Threads,
            "gccount" => Variable::GcCount,
            "gctime" => Variable::GcTime,
            _ => return None,
        })
    }

    /// Canonical spelling, used by `Display` and by the message template's
    /// `.Field` lookups.
    pub fn canonical(&self) -> &'static str {
        match self {
            Variable::Usage => "usage",
            Variable::Active => "active",
            Variable::Idle => "idle",
            Variable::Pending => "pending",
            Variable::Max => "max",
            Variable::Timeout => "timeout",
            Variable::HeapUsage => "heap_usage",
            Variable::HeapUsed => "heap_used",
            Variable::HeapMax => "heap_max",
            Variable::NonHeapUsed => "non_heap_used",
            Variable::Cpu => "cpu",
            Variable::Threads => "threads",
            Variable::GcCount => "gc_count",
            Variable::GcTime => "gc_time",
        }
    }

    /// Extract this variable's value from a sample, per `SPEC_FULL.md` §4.5.1.
    pub fn extract(&self, sample: &Sample) -> f64 {
        match self {
            Variable::Usage => sample.usage_pct(),
            Variable::Active => sample.active as f64,
            Variable::Idle => sample.idle as f64,
            Variable::Pending => sample.pending as f64,
            Variable::Max => sample.max as f64,
            Variable::Timeout => sample.timeout_count as f64,
            Variable::HeapUsage => sample.heap_pct(),
            Variable::HeapUsed => sample.heap_used as f64,
            Variable::HeapMax => sample.heap_max as f64,
            Variable::NonHeapUsed => sample.nonheap_used as f64,
            // CPU ratio multiplied by 100 so "cpu > 80" means > 80%.
            Variable::Cpu => sample.cpu_usage_ratio * 100.0,
            Variable::Threads => sample.threads_live as f64,
            Variable::GcCount => sample.gc_count as f64,
            Variable::GcTime => sample.gc_total_seconds,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

impl Operator {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "==" => Operator::Eq,
            "!=" => Operator::Neq,
            _ => return None,
        })
    }

    fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Gt => lhs > rhs,
            Operator::Gte => lhs >= rhs,
            Operator::Lt => lhs < rhs,
            Operator::Lte => lhs <= rhs,
            Operator::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Operator::Neq => (lhs - rhs).abs() >= f64::EPSILON,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Eq => "==",
            Operator::Neq => "!=",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Condition {
    pub variable: Variable,
    pub op: Operator,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    Malformed(String),
    UnknownVariable(String),
    UnknownOperator(String),
    NonNumericThreshold(String),
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionError::Malformed(raw) => {
                write!(f, "malformed condition, expected '<variable> <op> <number>': '{raw}'")
            }
            ConditionError::UnknownVariable(v) => write!(f, "unknown variable: '{v}'"),
            ConditionError::UnknownOperator(op) => write!(f, "unknown operator: '{op}'"),
            ConditionError::NonNumericThreshold(t) => write!(f, "non-numeric threshold: '{t}'"),
        }
    }
}

impl std::error::Error for ConditionError {}

impl Condition {
    pub fn parse(raw: &str) -> Result<Self, ConditionError> {
        let tokens: Vec<&str> = raw.split_whitespace().collect();
        let [var_tok, op_tok, num_tok] = tokens[..] else {
            return Err(ConditionError::Malformed(raw.to_string()));
        };

        let variable = Variable::parse(var_tok)
            .ok_or_else(|| ConditionError::UnknownVariable(var_tok.to_string()))?;
        let op =
            Operator::parse(op_tok).ok_or_else(|| ConditionError::UnknownOperator(op_tok.to_string()))?;
        let threshold = num_tok
            .parse::<f64>()
            .map_err(|_| ConditionError::NonNumericThreshold(num_tok.to_string()))?;

        Ok(Condition {
            variable,
            op,
            threshold,
        })
    }

    pub fn evaluate(&self, sample: &Sample) -> bool {
        self.op.apply(self.variable.extract(sample), self.threshold)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.variable, self.op, self.threshold)
    }
}
