pub mod alert_rule;
pub mod alert_run;
pub mod email_config;
pub mod sms_config;
