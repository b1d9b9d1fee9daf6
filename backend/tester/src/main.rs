use anyhow::{Context, Result, bail};
use clap::Parser;
use reqwest::{Client, Method};
use serde_json::{Value, json};

/// Walks a running server through founder, investors, funding and refund.
#[derive(Parser)]
struct Args {
    /// Server base URL
    #[arg(default_value = "http://localhost:8000", env = "TESTER_URL")]
    base_url: String,

    /// Suffix appended to every created name so reruns do not collide
    #[arg(long, default_value_t = std::process::id().to_string())]
    run: String,
}

async fn call(client: &Client, method: Method, url: &str, body: Option<Value>) -> Result<Value> {
    let mut request = client.request(method.clone(), url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("{method} {url}"))?;
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    println!("{method} {url} -> {status}");
    if !status.is_success() {
        bail!("{method} {url} failed with {status}: {body}");
    }

    Ok(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let base = args.base_url.trim_end_matches('/');
    let client = Client::new();

    let founder = format!("Founder {}", args.run);
    let project = format!("Project {}", args.run);
    let investors = [format!("Asha {}", args.run), format!("Ben {}", args.run)];

    call(&client, Method::GET, &format!("{base}/"), None).await?;

    call(
        &client,
        Method::POST,
        &format!("{base}/founder"),
        Some(json!({ "name": founder })),
    )
    .await?;

    call(
        &client,
        Method::POST,
        &format!("{base}/project"),
        Some(json!({
            "founderName": founder,
            "name": project,
            "shortDescription": "Smoke test project",
            "fundingGoal": 10000,
        })),
    )
    .await?;

    for (investor, amount) in investors.iter().zip([600, 400]) {
        call(
            &client,
            Method::POST,
            &format!("{base}/investor"),
            Some(json!({ "name": investor, "totFunds": 5000 })),
        )
        .await?;

        let funded = call(
            &client,
            Method::POST,
            &format!("{base}/project/fund"),
            Some(json!({ "projName": project, "fundAmt": amount, "investorName": investor })),
        )
        .await?;
        println!("  raised {}", funded["project"]["raisedAmount"]);
    }

    let settled = call(
        &client,
        Method::POST,
        &format!("{base}/refund/{project}"),
        None,
    )
    .await?;
    println!("{:#}", settled["settlement"]);

    for investor in &investors {
        let body = call(
            &client,
            Method::GET,
            &format!("{base}/investor/{investor}"),
            None,
        )
        .await?;
        println!("  {investor}: totFunds {}", body["investor"]["totFunds"]);
    }

    Ok(())
}
