//! Report Module
//!
//! End-of-run summary for batch operations.

use crate::batch::BatchResult;
use crate::progress::format_duration;
use console::style;
use std::time::Duration;

pub fn print_summary_report(result: &BatchResult, duration: Duration, operation_name: &str) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  📊 {:<57}║", format!("{} Summary", operation_name));
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  📁 Files Found:        {:>10}                           ║", result.total);
    println!("║  ✅ Converted:          {:>10}                           ║", result.succeeded);
    println!("║  ⏭️  Already Present:    {:>10}                           ║", result.skipped);
    println!("║  ❌ Failed:             {:>10}                           ║", result.failed);
    if result.abandoned > 0 {
        println!("║  ⏹️  Not Started:        {:>10}                           ║", result.abandoned);
    }
    println!("║  📈 Success Rate:       {:>9.1}%                           ║", result.success_rate());
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  ⏱️  Total Time:         {:>10}                           ║", format_duration(duration));
    println!("╚══════════════════════════════════════════════════════════════╝");

    if !result.errors.is_empty() {
        println!();
        println!("{}", style("❌ Errors encountered:").red().bold());
        for (path, error) in &result.errors {
            println!("   {} → {}", path.display(), error);
        }
    }
}
