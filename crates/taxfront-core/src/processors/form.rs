//! Form generation: run the calculator for a form type and store the generated form.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::domain::{Document, ProcessorError, Task, TaskType, timestamp};
use crate::ports::{Clock, DocumentStore};

use super::{PayloadProcessor, ProcessorContext, object};

pub const GENERATED_FORMS_COLLECTION: &str = "generatedForms";

/// Computes a form's derived lines from its input data.
pub type FormCalculator = Arc<dyn Fn(&Document) -> Result<Document, ProcessorError> + Send + Sync>;

#[derive(Debug, Clone, Deserialize)]
pub struct FormPayload {
    pub form_type: String,
    pub form_data: Document,
    pub tax_year: i32,
}

pub struct FormGenerationProcessor {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    calculators: HashMap<String, FormCalculator>,
}

impl FormGenerationProcessor {
    /// With the built-in `FORM_1040` and `SCHEDULE_C` calculators.
    pub fn new(ctx: &ProcessorContext) -> Self {
        let mut processor = Self {
            store: Arc::clone(&ctx.store),
            clock: Arc::clone(&ctx.clock),
            calculators: HashMap::new(),
        };
        processor.register_calculator("FORM_1040", Arc::new(form_1040));
        processor.register_calculator("SCHEDULE_C", Arc::new(schedule_c));
        processor
    }

    /// Add or replace the calculator for `form_type`.
    pub fn register_calculator(&mut self, form_type: impl Into<String>, calculator: FormCalculator) {
        self.calculators.insert(form_type.into(), calculator);
    }

    pub fn supports(&self, form_type: &str) -> bool {
        self.calculators.contains_key(form_type)
    }
}

#[async_trait]
impl PayloadProcessor for FormGenerationProcessor {
    type Payload = FormPayload;
    const TASK_TYPE: TaskType = TaskType::FormGeneration;
    const REQUIRED_FIELDS: &'static [&'static str] = &["form_type", "form_data", "tax_year"];

    async fn handle(&self, task: &Task, payload: FormPayload) -> Result<Document, ProcessorError> {
        let calculator = self
            .calculators
            .get(&payload.form_type)
            .ok_or_else(|| ProcessorError::unsupported("form type", &payload.form_type))?;
        let calculations = calculator(&payload.form_data)?;

        let form = json!({
            "form_type": payload.form_type,
            "tax_year": payload.tax_year,
            "data": payload.form_data,
            "calculations": calculations,
        });
        let record = object(json!({
            "userId": task.user_id,
            "formType": payload.form_type,
            "taxYear": payload.tax_year,
            "formData": form,
            "createdAt": timestamp::to_value(&self.clock.now()),
            "status": "generated",
        }));
        // keyed by task id: a retried task overwrites its own form
        let form_id = task.id.as_str();
        self.store.set(GENERATED_FORMS_COLLECTION, form_id, record).await?;

        info!(task_id = %task.id, form_type = %payload.form_type, tax_year = payload.tax_year, "form generated");
        Ok(object(json!({
            "form_id": form_id,
            "form_type": payload.form_type,
            "tax_year": payload.tax_year,
            "success": true,
        })))
    }
}

/// 2023 single-filer brackets: (upper bound of bracket, rate).
const BRACKETS: &[(f64, f64)] = &[
    (11_000.0, 0.10),
    (44_725.0, 0.12),
    (95_375.0, 0.22),
    (182_100.0, 0.24),
    (231_250.0, 0.32),
    (578_125.0, 0.35),
    (f64::INFINITY, 0.37),
];
const STANDARD_DEDUCTION: f64 = 13_850.0;

fn form_1040(data: &Document) -> Result<Document, ProcessorError> {
    let total_income = sum(data, &["wages", "interest", "dividends", "business_income", "other_income"])?;
    let adjustments = amount(data, "adjustments")?;
    let deduction = amount(data, "itemized_deductions")?.max(
        optional_amount(data, "standard_deduction")?.unwrap_or(STANDARD_DEDUCTION),
    );
    let taxable_income = (total_income - adjustments - deduction).max(0.0);
    let total_tax = bracket_tax(taxable_income);
    let payments = sum(data, &["withholding", "estimated_payments"])?;

    Ok(object(json!({
        "total_income": cents(total_income),
        "taxable_income": cents(taxable_income),
        "total_tax": cents(total_tax),
        "payments": cents(payments),
        "refund_due": cents((payments - total_tax).max(0.0)),
        "amount_owed": cents((total_tax - payments).max(0.0)),
    })))
}

fn schedule_c(data: &Document) -> Result<Document, ProcessorError> {
    let gross_receipts = amount(data, "gross_receipts")? - amount(data, "returns_and_allowances")?;
    let total_expenses = match data.get("expenses") {
        Some(Value::Object(items)) => items
            .keys()
            .map(|k| amount(items, k))
            .sum::<Result<f64, _>>()?,
        _ => amount(data, "total_expenses")?,
    };
    Ok(object(json!({
        "gross_receipts": cents(gross_receipts),
        "total_expenses": cents(total_expenses),
        "net_profit": cents(gross_receipts - total_expenses),
    })))
}

fn bracket_tax(taxable: f64) -> f64 {
    let mut tax = 0.0;
    let mut floor = 0.0;
    for &(ceiling, rate) in BRACKETS {
        if taxable <= floor {
            break;
        }
        tax += (taxable.min(ceiling) - floor) * rate;
        floor = ceiling;
    }
    tax
}

fn cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn sum(data: &Document, keys: &[&str]) -> Result<f64, ProcessorError> {
    keys.iter().map(|k| amount(data, k)).sum()
}

/// Missing or `null` counts as zero.
fn amount(data: &Document, key: &str) -> Result<f64, ProcessorError> {
    Ok(optional_amount(data, key)?.unwrap_or(0.0))
}

fn optional_amount(data: &Document, key: &str) -> Result<Option<f64>, ProcessorError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s.trim().replace(',', "").parse::<f64>().map(Some).map_err(|_| {
            ProcessorError::invalid_payload(TaskType::FormGeneration, format!("{key} is not a number: {s:?}"))
        }),
        Some(other) => Err(ProcessorError::invalid_payload(
            TaskType::FormGeneration,
            format!("{key} is not a number: {other}"),
        )),
    }
}
