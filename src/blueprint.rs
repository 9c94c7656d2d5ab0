use futures::future::BoxFuture;
use tracing::debug;

use guild_core::error::{GuildError, Result};
use guild_core::traits::BlueprintSupplier;
use guild_core::types::{AgentSpec, Blueprint, SuggestedStructure, WorkflowSpec};

/// A business domain with the keywords that point at it.
struct Domain {
    name: &'static str,
    keywords: &'static [&'static str],
    build: fn() -> Blueprint,
}

const DOMAINS: &[Domain] = &[
    Domain {
        name: "customer_success",
        keywords: &[
            "customer", "support", "ticket", "help", "service", "satisfaction", "churn",
            "feedback", "onboarding",
        ],
        build: customer_success,
    },
    Domain {
        name: "financial_intelligence",
        keywords: &[
            "finance", "payment", "invoice", "billing", "accounting", "revenue", "expense",
            "mrr", "cash", "profit",
        ],
        build: financial_intelligence,
    },
    Domain {
        name: "revenue_operations",
        keywords: &[
            "sales", "lead", "prospect", "deal", "pipeline", "crm", "conversion", "outreach",
            "quota",
        ],
        build: revenue_operations,
    },
];

/// Keyword-matched blueprint templates, standing in for a generative service.
///
/// The domain with the most keyword hits wins; ties go to the domain listed
/// first. No hits yields a generic operations guild.
#[derive(Debug, Default, Clone)]
pub struct TemplateBlueprintSupplier;

impl TemplateBlueprintSupplier {
    pub fn new() -> Self {
        Self
    }

    fn pick(intent: &str) -> Blueprint {
        let text = intent.to_lowercase();
        let mut best: Option<(&Domain, usize)> = None;
        for domain in DOMAINS {
            let score = domain.keywords.iter().filter(|k| text.contains(*k)).count();
            if score > 0 && best.map_or(true, |(_, top)| score > top) {
                best = Some((domain, score));
            }
        }

        match best {
            Some((domain, score)) => {
                debug!(domain = domain.name, score, "Matched blueprint template");
                (domain.build)()
            }
            None => {
                debug!("No template matched, using generic blueprint");
                generic(intent)
            }
        }
    }
}

impl BlueprintSupplier for TemplateBlueprintSupplier {
    fn generate(&self, intent: String) -> BoxFuture<'_, Result<Blueprint>> {
        Box::pin(async move {
            if intent.trim().is_empty() {
                return Err(GuildError::Blueprint("describe what the guild should do".into()));
            }
            Ok(Self::pick(&intent))
        })
    }
}

fn agent(name: &str, role: &str, description: &str, tools: &[&str]) -> AgentSpec {
    AgentSpec::new(name, role)
        .with_description(description)
        .with_tools(tools.iter().map(|t| t.to_string()).collect())
}

fn workflow(name: &str, description: &str, trigger_type: &str) -> WorkflowSpec {
    WorkflowSpec {
        name: name.into(),
        description: description.into(),
        trigger_type: trigger_type.into(),
    }
}

fn customer_success() -> Blueprint {
    Blueprint {
        guild_name: "Customer Success Intelligence Center".into(),
        guild_purpose: "Resolve customer issues quickly and spot churn risk early".into(),
        suggested_structure: SuggestedStructure {
            agents: vec![
                agent(
                    "Sophia",
                    "Customer Success Specialist",
                    "Triages incoming tickets and drafts personalized replies",
                    &["Zendesk API", "Slack API", "Stripe Customer API"],
                ),
                agent(
                    "Marcus",
                    "Knowledge Manager",
                    "Keeps help articles current with what support learns",
                    &["Notion API"],
                ),
                agent(
                    "Elena",
                    "Customer Health Analyst",
                    "Scores account health and flags churn risk",
                    &["Mixpanel API"],
                ),
            ],
            workflows: vec![
                workflow("Ticket triage", "Classify and route new tickets", "webhook"),
                workflow("Health check", "Daily account health review", "schedule"),
            ],
        },
    }
}

fn financial_intelligence() -> Blueprint {
    Blueprint {
        guild_name: "Financial Intelligence Command".into(),
        guild_purpose: "Report revenue in real time and keep billing compliant".into(),
        suggested_structure: SuggestedStructure {
            agents: vec![
                agent(
                    "Alexander",
                    "Revenue Analyst",
                    "Pulls revenue streams and computes MRR trends",
                    &["Stripe API", "QuickBooks API"],
                ),
                agent(
                    "Victoria",
                    "Compliance Specialist",
                    "Checks invoices and tax calculations",
                    &["Avalara Tax API"],
                ),
                agent(
                    "Diana",
                    "Financial Advisor",
                    "Summarizes cash flow and posts the report to the team",
                    &["Slack API"],
                ),
            ],
            workflows: vec![
                workflow("Executive reporting", "Weekly financial summary", "schedule"),
                workflow("Revenue recognition", "Process new payments", "webhook"),
            ],
        },
    }
}

fn revenue_operations() -> Blueprint {
    Blueprint {
        guild_name: "Revenue Growth Accelerator".into(),
        guild_purpose: "Qualify leads and keep the sales pipeline moving".into(),
        suggested_structure: SuggestedStructure {
            agents: vec![
                agent(
                    "Phoenix",
                    "Lead Development Specialist",
                    "Scores and enriches inbound leads",
                    &["HubSpot API"],
                ),
                agent(
                    "Maximus",
                    "Sales Operations Director",
                    "Finds pipeline bottlenecks and alerts the team",
                    &["Slack API"],
                ),
                agent(
                    "Aurora",
                    "Sales Performance Analyst",
                    "Tracks win rates against revenue",
                    &["Stripe API"],
                ),
            ],
            workflows: vec![workflow(
                "Lead qualification",
                "Score and route new leads",
                "webhook",
            )],
        },
    }
}

fn generic(intent: &str) -> Blueprint {
    Blueprint {
        guild_name: "Operations Guild".into(),
        guild_purpose: intent.trim().to_string(),
        suggested_structure: SuggestedStructure {
            agents: vec![
                agent(
                    "Atlas",
                    "Process Coordinator",
                    "Breaks the request into tasks and tracks them",
                    &[],
                ),
                agent(
                    "Iris",
                    "Reporter",
                    "Summarizes outcomes for the team",
                    &[],
                ),
            ],
            workflows: vec![workflow("Manual run", "Started on demand", "manual")],
        },
    }
}
