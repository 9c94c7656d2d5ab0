use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dialoguer::{Confirm, Input, Password, Select};
use serde_json::Value;

use guild_core::config::{AppConfig, CredentialRequirement};
use guild_core::context::ValueEnvironment;
use guild_core::types::{ConditionType, NodeId, StepId};
use guild_engine::graph::{Edge, Node};
use guild_wizard::WizardSession;

use crate::blueprint::TemplateBlueprintSupplier;
use crate::deploy::DryRunDeployer;
use crate::executor::TemplateAgentExecutor;
use crate::render;

pub struct WizardOptions {
    pub intent: Option<String>,
    pub inputs: ValueEnvironment,
    pub latency: Duration,
}

/// What the user chose at the end of a step.
enum Flow {
    Next,
    Back,
    Goto(StepId),
    Stay,
    Quit,
}

pub async fn run_wizard(config: &AppConfig, options: WizardOptions) -> Result<()> {
    let executor = Arc::new(TemplateAgentExecutor::new(options.latency));
    let mut session = WizardSession::new(config, executor);
    let printer = render::spawn_event_printer(session.subscribe());
    let supplier = TemplateBlueprintSupplier::new();
    let mut preset_intent = options.intent;

    println!();
    println!("  Guild setup wizard");
    println!("  ==================");

    loop {
        let flow = match session.current_step() {
            StepId::Intent => intent_step(&mut session, &supplier, preset_intent.take()).await?,
            StepId::Canvas => canvas_step(&mut session)?,
            StepId::Credentials => credentials_step(&mut session)?,
            StepId::Simulation => simulation_step(&mut session, &options.inputs).await?,
            StepId::Deployment => {
                deployment_step(&mut session).await?;
                break;
            }
        };

        match flow {
            Flow::Next => {
                if let Err(e) = session.next_step() {
                    println!("  Blocked: {e}");
                }
            }
            Flow::Back => session.previous_step(),
            Flow::Goto(step) => {
                if let Err(e) = session.advance_step(step) {
                    println!("  Blocked: {e}");
                }
            }
            Flow::Stay => {}
            Flow::Quit => break,
        }
    }

    printer.abort();
    Ok(())
}

fn header(step: StepId) {
    let position = StepId::ALL.iter().position(|s| *s == step).unwrap_or(0) + 1;
    println!();
    println!("== Step {}/{}: {} ==", position, StepId::ALL.len(), step);
}

async fn intent_step(
    session: &mut WizardSession,
    supplier: &TemplateBlueprintSupplier,
    preset: Option<String>,
) -> Result<Flow> {
    header(StepId::Intent);
    let intent = match preset {
        Some(text) => text,
        None => Input::<String>::new()
            .with_prompt("What should your guild do?")
            .interact_text()?,
    };

    match session.generate_blueprint(supplier, &intent).await {
        Ok(blueprint) => {
            println!();
            println!("  {}", blueprint.guild_name);
            println!("  {}", blueprint.guild_purpose);
            for agent in blueprint.agents() {
                println!("    - {} ({})", agent.name, agent.role);
                if !agent.tools_needed.is_empty() {
                    println!("      tools: {}", agent.tools_needed.join(", "));
                }
            }
        }
        Err(e) => {
            println!("  {e}");
            return Ok(Flow::Stay);
        }
    }

    let choice = Select::new()
        .with_prompt("Next")
        .items(&["Lay out the workflow", "Describe it differently", "Quit"])
        .default(0)
        .interact()?;
    Ok(match choice {
        0 => Flow::Next,
        1 => Flow::Stay,
        _ => Flow::Quit,
    })
}

fn canvas_step(session: &mut WizardSession) -> Result<Flow> {
    header(StepId::Canvas);
    if let Some(graph) = session.graph() {
        render::print_graph(graph);
    }

    let choice = Select::new()
        .with_prompt("Canvas")
        .items(&[
            "Continue to credentials",
            "Insert a condition after an agent",
            "Preview a condition",
            "Export graph as JSON",
            "Back",
        ])
        .default(0)
        .interact()?;

    match choice {
        0 => Ok(Flow::Next),
        1 => {
            insert_condition(session)?;
            Ok(Flow::Stay)
        }
        2 => {
            preview_condition(session)?;
            Ok(Flow::Stay)
        }
        3 => {
            export_graph(session)?;
            Ok(Flow::Stay)
        }
        _ => Ok(Flow::Back),
    }
}

/// Split `source -> target` with a new condition node whose true port keeps
/// going to `target` and whose false port goes to a node the user picks.
fn insert_condition(session: &mut WizardSession) -> Result<()> {
    let Some(graph) = session.graph() else {
        return Ok(());
    };

    let candidates: Vec<(NodeId, NodeId)> = graph
        .nodes()
        .filter(|n| !n.is_condition())
        .filter_map(|n| match graph.outgoing_edges(&n.id, None).as_slice() {
            [only] => Some((n.id.clone(), only.target.clone())),
            _ => None,
        })
        .collect();
    if candidates.is_empty() {
        println!("  No agent has exactly one successor to branch from.");
        return Ok(());
    }
    let labels: Vec<String> = candidates.iter().map(|(s, t)| format!("{s} -> {t}")).collect();
    let pick = Select::new()
        .with_prompt("Branch after")
        .items(&labels)
        .default(0)
        .interact()?;
    let (source, target) = candidates[pick].clone();

    let others: Vec<NodeId> = graph
        .nodes()
        .map(|n| n.id.clone())
        .filter(|id| *id != source && *id != target)
        .collect();
    if others.is_empty() {
        println!("  The false branch needs another node to continue at.");
        return Ok(());
    }
    let id = NodeId::new(format!("cond-{:02}", graph.condition_ids().len() + 1));

    let types = [
        ConditionType::If,
        ConditionType::Gate,
        ConditionType::Switch,
        ConditionType::Filter,
    ];
    let type_labels = [
        "if      (boolean expression)",
        "gate    (open when truthy)",
        "switch  (subject => case | case)",
        "filter  (collection where predicate)",
    ];
    let kind = Select::new()
        .with_prompt("Condition type")
        .items(&type_labels)
        .default(0)
        .interact()?;
    let expression: String = Input::new().with_prompt("Condition").interact_text()?;
    let false_pick = Select::new()
        .with_prompt("When false, continue at")
        .items(&others)
        .default(0)
        .interact()?;
    let false_target = others[false_pick].clone();

    let outcome = session.edit_graph(|g| {
        g.remove_edge(&Edge::new(source.clone(), target.clone()));
        g.add_node(Node::condition_of(id.clone(), types[kind], expression))?;
        g.add_edge(Edge::new(source, id.clone()))?;
        g.add_edge(Edge::on_true(id.clone(), target))?;
        g.add_edge(Edge::on_false(id, false_target))
    });
    match outcome {
        Ok(()) => println!("  Condition added."),
        Err(e) => println!("  {e}"),
    }
    Ok(())
}

fn preview_condition(session: &mut WizardSession) -> Result<()> {
    let ids = session
        .graph()
        .map(|g| g.condition_ids())
        .unwrap_or_default();
    if ids.is_empty() {
        println!("  The graph has no condition nodes.");
        return Ok(());
    }
    let pick = Select::new()
        .with_prompt("Condition")
        .items(&ids)
        .default(0)
        .interact()?;
    let raw: String = Input::new()
        .with_prompt("Values (JSON object)")
        .default("{}".to_string())
        .interact_text()?;

    let env = match serde_json::from_str::<Value>(&raw) {
        Ok(value @ Value::Object(_)) => ValueEnvironment::from_value(value),
        _ => {
            println!("  Expected a JSON object such as {{\"score\": 80}}.");
            return Ok(());
        }
    };
    match session.preview_condition(&ids[pick], &env) {
        Ok(decision) => println!("  -> {} ({})", decision.branch, decision.detail),
        Err(e) => println!("  {e}"),
    }
    Ok(())
}

fn export_graph(session: &WizardSession) -> Result<()> {
    let Some(graph) = session.graph() else {
        return Ok(());
    };
    let path: String = Input::new()
        .with_prompt("File")
        .default("guild-graph.json".to_string())
        .interact_text()?;
    std::fs::write(&path, serde_json::to_string_pretty(graph)?)?;
    println!("  Wrote {path}");
    Ok(())
}

fn credentials_step(session: &mut WizardSession) -> Result<Flow> {
    header(StepId::Credentials);
    let required: Vec<CredentialRequirement> =
        session.required_credentials().into_iter().cloned().collect();
    if required.is_empty() {
        println!("  This guild needs no credentials.");
    }

    for req in &required {
        if session.credentials().validate(&req.id) {
            println!("  [OK] {}", req.name);
            continue;
        }
        println!();
        println!("  {}: {}", req.name, req.description);
        for (i, step) in req.instructions.iter().enumerate() {
            println!("    {}. {}", i + 1, step);
        }
        loop {
            let value = Password::new()
                .with_prompt(format!("{} ({})", req.name, req.placeholder))
                .allow_empty_password(true)
                .interact()?;
            if value.is_empty() {
                println!("  Skipped.");
                break;
            }
            if session.edit_credential(req.id.clone(), value) {
                println!("  [OK] {}", req.name);
                break;
            }
            println!("  [!!] That does not look like a valid {}.", req.name);
        }
    }

    let choice = Select::new()
        .with_prompt("Next")
        .items(&["Continue to simulation", "Back to canvas", "Quit"])
        .default(0)
        .interact()?;
    Ok(match choice {
        0 => Flow::Next,
        1 => Flow::Back,
        _ => Flow::Quit,
    })
}

async fn simulation_step(session: &mut WizardSession, inputs: &ValueEnvironment) -> Result<Flow> {
    header(StepId::Simulation);
    let choice = Select::new()
        .with_prompt("Simulation")
        .items(&["Run simulation", "Back to credentials", "Quit"])
        .default(0)
        .interact()?;
    match choice {
        0 => {}
        1 => return Ok(Flow::Back),
        _ => return Ok(Flow::Quit),
    }

    if let Err(e) = session.start_simulation(inputs.clone()) {
        println!("  Could not start: {e}");
        return Ok(Flow::Stay);
    }
    println!("  (Ctrl-C cancels the run)");
    let cancel = session.simulation_cancel_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Some(token) = cancel {
                token.cancel();
            }
        }
    });
    let outcome = session.await_simulation().await;
    watcher.abort();
    // Let the event printer drain before the summary.
    tokio::time::sleep(Duration::from_millis(50)).await;

    match outcome {
        Ok(result) => {
            render::print_result(&result);
            let choice = Select::new()
                .with_prompt("Next")
                .items(&["Continue to deployment", "Run again", "Back to credentials"])
                .default(0)
                .interact()?;
            Ok(match choice {
                0 => Flow::Next,
                1 => Flow::Stay,
                _ => Flow::Back,
            })
        }
        Err(e) => {
            println!("  Simulation did not complete: {e}");
            let choice = Select::new()
                .with_prompt("Next")
                .items(&["Retry", "Back to credentials", "Back to canvas", "Quit"])
                .default(0)
                .interact()?;
            Ok(match choice {
                0 => Flow::Stay,
                1 => Flow::Back,
                2 => Flow::Goto(StepId::Canvas),
                _ => Flow::Quit,
            })
        }
    }
}

async fn deployment_step(session: &mut WizardSession) -> Result<()> {
    header(StepId::Deployment);
    let name = session
        .blueprint()
        .map(|b| b.guild_name.clone())
        .unwrap_or_default();
    let deploy = Confirm::new()
        .with_prompt(format!("Deploy {name}?"))
        .default(true)
        .interact()?;
    if !deploy {
        println!("  Not deployed.");
        return Ok(());
    }
    match session.deploy(&DryRunDeployer).await {
        Ok(id) => println!("  Deployed as {id}"),
        Err(e) => println!("  Deployment failed: {e}"),
    }
    Ok(())
}
