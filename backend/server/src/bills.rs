//! # Bill Analysis
//!
//! Utility bill photos go to a generative model with a fixed prompt, the JSON it returns is added
//! to the user's carbon footprint.
//!
//! ## Emission factors
//!
//! - Electricity: 0.82 kg CO2 per kWh (India, 2023 average)
//! - Gas, LPG assumed: 2.9 kg CO2 per kg
//! - Water: 0
//!
//! ## Accumulation
//!
//! - `electricity` bills add `carbon_emissions.value` to the electricity component
//! - `gas` bills add to the gas component
//! - Every raw result is appended to the user's analysis results
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    documents::{Document, sub_key},
    error::AppError,
    models::User,
    repository::{ANALYSES, CARBON, Repository},
    store::WriteBatch,
    utils::{extract_json, is_present},
};

pub const ELECTRICITY_KG_PER_KWH: f64 = 0.82;
pub const LPG_KG_PER_KG: f64 = 2.9;
pub const BILLS_PER_REQUEST: usize = 2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub images_base64: Option<Vec<String>>,
    #[serde(default)]
    pub user_data: Option<Household>,
}

#[derive(Debug, Deserialize)]
pub struct Household {
    #[serde(default)]
    pub family_size: Option<Value>,
    #[serde(default)]
    pub region: Option<Value>,
}

#[async_trait]
pub trait BillAnalyzer: Send + Sync {
    /// Raw model reply for one bill image.
    async fn analyze(&self, prompt: &str, image_base64: &str) -> Result<String, AppError>;
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn prompt(family_size: &str, region: &str) -> String {
    format!(
        r#"
Analyze this utility bill image for a household in India with {family_size} members in {region} and calculate the **precise carbon emissions** associated with the reported consumption, using specific emission factors.

Return ONLY a valid JSON object for each bill, strictly following this format:
```json
{{
  "bill_type": "electricity|water|gas",
  "bill_provider": "string",
  "billing_period": "string",
  "consumption": {{
    "value": number,
    "unit": "string",
    "previous_value": number or null
  }},
  "amount": {{
    "value": number,
    "currency": "string"
  }},
  "consumption_rating": "excellent|good|average|high|excessive",
  "consumption_per_person": number,
  "regional_average_per_person": number,
  "percentage_diff_from_average": number,
  "seasonal_factor": number between 0.8 and 1.2,
  "sustainability_score": number between 0 and 100,
  "key_insights": [
    "string", "string"
  ],
  "recommendations": [
    "string", "string"
  ],
  "estimated_savings_potential": {{
    "value": number,
    "unit": "string"
  }},
  "carbon_emissions": {{
    "value": number,
    "unit": "kgs"
  }}
}}
```

**Instructions for EXACT 'carbon_emissions' calculation:**

- **MANDATORY:** You **MUST** calculate and return the 'carbon_emissions' value in kilograms (kgs) for each applicable bill type (electricity and gas). For water bills, return 0.
- Perform an **EXACT calculation** of carbon emissions using the consumption from the bill and the following specific emission factors.

- **Electricity Bills:**
  1.  **Emission Factor:** Use a carbon intensity of **{ELECTRICITY_KG_PER_KWH} kilograms of CO2 per kWh** for electricity in India (based on the average for 2023).
  2.  **Carbon Emissions Calculation:** 'carbon_emissions' = (Electricity consumption in kWh from the bill) * **{ELECTRICITY_KG_PER_KWH} kg CO2/kWh**. Use the consumption value directly from the bill to get the precise emission.

- **Gas Bills (LPG assumed):**
  1.  **Emission Factor:** Use a CO2 emission factor of **{LPG_KG_PER_KG} kilograms of CO2 per kg of LPG**.
  2.  **Carbon Emissions Calculation:** 'carbon_emissions' = (Gas consumption in kg of LPG from the bill) * **{LPG_KG_PER_KG} kg CO2/kg LPG**. Use the gas consumption value directly from the bill to get the precise emission. If gas consumption unit is not in kg, mention the unit assumed for calculation in 'key_insights'. If gas consumption is not available on the bill, return 0 for carbon_emissions.

- **Water Bills:** Return 'carbon_emissions': {{ "value": 0, "unit": "kgs" }}.

**Important Notes:**
- Use the specified, precise emission factors for carbon emission calculations.
- Ensure 'carbon_emissions' values for Electricity and Gas are based on the reported bill consumption and are calculated exactly as instructed.
- Provide units clearly for all values in the JSON.
- Do not include any additional text or explanations outside the JSON object.
- The 'carbon_emissions' values should be specific and reflect the carbon footprint based on the provided emission factors for 2023 (for electricity) and the LPG emission factor. They should not be estimations or rounded values unless necessary due to limitations in input data.
"#
    )
}

#[derive(Debug, Deserialize)]
struct Emissions {
    #[serde(default)]
    value: Option<f64>,
}

/// The two fields accumulation needs, everything else stays in the raw result.
#[derive(Debug, Deserialize)]
struct BillSummary {
    #[serde(default)]
    bill_type: Option<String>,
    #[serde(default)]
    carbon_emissions: Option<Emissions>,
}

fn parse_reply(reply: &str) -> Result<Value, AppError> {
    let json = extract_json(reply).ok_or_else(|| {
        warn!("No JSON in model reply: {reply}");
        AppError::Upstream("No JSON found in the response".to_string())
    })?;

    serde_json::from_str(json).map_err(|e| {
        warn!("Failed to parse model reply: {e}");
        AppError::Upstream("Failed to parse model response as JSON".to_string())
    })
}

/// Electricity and gas deltas contributed by a set of results.
pub fn emission_deltas(results: &[Value]) -> (f64, f64) {
    let mut electricity = 0.0;
    let mut gas = 0.0;

    for result in results {
        let Ok(summary) = serde_json::from_value::<BillSummary>(result.clone()) else {
            continue;
        };
        let value = summary
            .carbon_emissions
            .and_then(|emissions| emissions.value)
            .unwrap_or(0.0);

        match summary.bill_type.as_deref() {
            Some("electricity") => electricity += value,
            Some("gas") => gas += value,
            _ => {}
        }
    }

    (electricity, gas)
}

pub async fn analyze_bills(
    repo: &Repository,
    analyzer: &dyn BillAnalyzer,
    user_id: &str,
    request: AnalyzeRequest,
) -> Result<Vec<Value>, AppError> {
    let images = match request.images_base64 {
        Some(images) if images.len() == BILLS_PER_REQUEST => images,
        _ => {
            return Err(AppError::Validation(
                "Exactly 2 images are required".to_string(),
            ));
        }
    };

    let (family_size, region) = request
        .user_data
        .map(|household| (household.family_size, household.region))
        .unwrap_or_default();
    if !is_present(family_size.as_ref()) || !is_present(region.as_ref()) {
        return Err(AppError::Validation(
            "Family size and region are required".to_string(),
        ));
    }
    let prompt = prompt(
        &family_size.as_ref().map(display).unwrap_or_default(),
        &region.as_ref().map(display).unwrap_or_default(),
    );

    let results = try_join_all(images.iter().map(|image| async {
        let reply = analyzer.analyze(&prompt, image).await?;
        debug!("Raw model reply: {reply}");
        parse_reply(&reply)
    }))
    .await?;

    // Results are only stored for a known user.
    repo.user(user_id).await?;

    let (electricity, gas) = emission_deltas(&results);
    let carbon_key = sub_key(User::COLLECTION, user_id, CARBON);
    let analyses_key = sub_key(User::COLLECTION, user_id, ANALYSES);

    let mut batch = WriteBatch::new();
    if electricity != 0.0 {
        batch.increment_float(carbon_key.as_str(), "electricity", electricity);
    }
    if gas != 0.0 {
        batch.increment_float(carbon_key.as_str(), "gas", gas);
    }
    for result in &results {
        batch.append(analyses_key.as_str(), result.to_string());
    }
    repo.store().commit(batch).await?;

    info!("Stored {} bill analyses for user {user_id}", results.len());

    Ok(results)
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Image { inline_data: InlineData<'a> },
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Deserialize)]
struct ReplyPart {
    #[serde(default)]
    text: Option<String>,
}

/// Gemini `generateContent` over REST.
pub struct GeminiAnalyzer {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiAnalyzer {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl BillAnalyzer for GeminiAnalyzer {
    async fn analyze(&self, prompt: &str, image_base64: &str) -> Result<String, AppError> {
        let Some(api_key) = &self.api_key else {
            return Err(AppError::Upstream(
                "Bill analysis is not configured".to_string(),
            ));
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let parts = [
            Part::Text { text: prompt },
            Part::Image {
                inline_data: InlineData {
                    mime_type: "image/jpeg",
                    data: image_base64,
                },
            },
        ];
        let body = json!({ "contents": [{ "parts": parts }] });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!("Model returned {status}: {detail}");
            return Err(AppError::Upstream(format!("Model returned {status}")));
        }

        let reply: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Unreadable model response: {e}")))?;

        let text: String = reply
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(AppError::Upstream("Model returned no text".to_string()));
        }

        Ok(text)
    }
}
