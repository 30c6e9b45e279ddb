use dotenv::dotenv;
use financial_record_reconciler::{
    FieldValue, GeminiClient, GeminiSettings, PipelineConfig, PipelineEvent, Provider,
    RawStatementRecord, ReconciliationPipeline,
};
use tokio::sync::mpsc;

fn fixture() -> Vec<RawStatementRecord> {
    let num = FieldValue::Number;
    vec![
        RawStatementRecord::new(Provider::Cninfo, "balance_sheet", "600519", "2024")
            .with_name("贵州茅台")
            .with_field("总资产", num(29894457.99))
            .with_field("负债合计", num(5165438.21)),
        RawStatementRecord::new(Provider::Cninfo, "income_statement", "600519", "2024")
            .with_field("净资产收益率", num(36.02)),
        RawStatementRecord::new(Provider::Eastmoney, "income", "600519", "2024-12-31")
            .with_field("WEIGHTAVG_ROE", num(34.2))
            .with_field("TOTAL_OPERATE_INCOME", num(174144069958.25)),
        RawStatementRecord::new(Provider::Thsl, "income", "600519", "2024")
            .with_field("净资产收益率", FieldValue::Text("36.02%".to_string()))
            .with_field("行业名称", FieldValue::Text("白酒".to_string())),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    println!("🚀 Reconciling 600519 across providers...");

    let client = GeminiClient::new(GeminiSettings::from_env()?);
    println!("🤖 Merge backend: Gemini ({})", client.model());

    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::MergeFallback { key, reason } => {
                    println!("   ⚠️  {} fell back to priority resolution: {}", key, reason)
                }
                PipelineEvent::RecordCompleted { key, provenance } => {
                    println!("   ✅ {} completed ({:?})", key, provenance)
                }
                other => println!("   • {:?}", other),
            }
        }
    });

    let pipeline = ReconciliationPipeline::new(PipelineConfig::default(), client)?.with_events(tx);
    let report = pipeline.run(&fixture()).await;
    drop(pipeline);
    printer.await?;

    for record in &report.records {
        println!("\n📊 {}", serde_json::to_string_pretty(record)?);
    }
    println!("\n📈 Metrics: {}", serde_json::to_string_pretty(&report.metrics)?);

    Ok(())
}
