//! Fixed topic taxonomy for financial-services feedback.

/// Topics the classification service (and the fallback analyzer) may
/// assign. At most three per text.
pub const FINANCIAL_TOPICS: &[&str] = &[
    // Core banking services
    "checking_account",
    "savings_account",
    "mobile_app",
    "online_banking",
    "atm",
    // Common issues
    "fees",
    "overdraft",
    "account_lock",
    "fraud",
    "security_breach",
    "customer_service",
    "branch_service",
    "phone_support",
    "wait_times",
    // User experience
    "ux",
    "website_issues",
    "app_crashes",
    "login_problems",
    "outage",
    "system_down",
    "maintenance",
    // Financial products
    "interest_rates",
    "rewards",
    "cashback",
    "credit_score",
    "loan_approval",
    "mortgage_rates",
    "refinancing",
    "investment_options",
    // Cross-border banking
    "cross_border_banking",
    "currency_exchange",
    "international_transfers",
];
