pub mod report;

pub use report::{
    alignment_report, comparison_report, merge_report, recovery_report, search_report, timing_report,
    write_report,
};
