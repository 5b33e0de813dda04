//! CLI subcommands — init, validate, order, plan, apply, destroy, status,
//! graph, completions.

use crate::config::{self, Config, CONFIG_FILE};
use crate::core::params::{self, ResolvedParameters};
use crate::core::parser::{self, Severity};
use crate::core::types::{ChangeSet, StackLock, Template};
use crate::core::{executor, graph, planner, resolver, state};
use crate::error::{Error, Result};
use crate::provisioner::StateOnly;
use crate::tripwire::{eventlog, hasher};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use indexmap::IndexMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "stackplan",
    version,
    about = "Validate, order and apply declarative infrastructure templates"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to stackplan.toml
    #[arg(long, global = true, env = "STACKPLAN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Graph output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Dot,
    Mermaid,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter template and stackplan.toml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Check a template for reference, cycle and literal errors
    Validate {
        /// Template file (default: from config)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,
    },

    /// Print the order resources are applied in
    Order {
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Group into waves of mutually independent resources
        #[arg(long)]
        waves: bool,
    },

    /// Show the change set (template vs stack state)
    Plan {
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Parameter override KEY=VALUE (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Limit to these resources and their dependencies (repeatable)
        #[arg(long)]
        target: Vec<String>,

        #[arg(long)]
        stack: Option<String>,

        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Print the change set as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply the change set and record the new stack state
    Apply {
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        #[arg(long)]
        target: Vec<String>,

        #[arg(long)]
        stack: Option<String>,

        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Show the plan without applying it
        #[arg(long)]
        dry_run: bool,

        /// Leave partial changes in place on failure
        #[arg(long)]
        no_rollback: bool,
    },

    /// Delete every resource tracked for a stack
    Destroy {
        #[arg(long)]
        stack: Option<String>,

        #[arg(long)]
        state_dir: Option<PathBuf>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Show recorded stack state
    Status {
        /// Only this stack (default: all stacks in the state directory)
        #[arg(long)]
        stack: Option<String>,

        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Print the dependency graph
    Graph {
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = GraphFormat::Dot)]
        format: GraphFormat,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Stack selection and overrides shared by plan and apply.
struct Target<'a> {
    file: PathBuf,
    stack: String,
    state_dir: PathBuf,
    params: &'a [String],
    targets: &'a [String],
}

/// `--stack` if given, else the configured stack. Either way the name must be
/// usable inside the state directory.
fn select_stack(stack: Option<String>, config: &Config) -> Result<String> {
    let stack = stack.unwrap_or_else(|| config.stack.clone());
    config::validate_stack_name(&stack)?;
    Ok(stack)
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands, config: &Config) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file, strict } => {
            cmd_validate(&file.unwrap_or_else(|| config.template.clone()), strict || config.strict)
        }
        Commands::Order { file, waves } => cmd_order(
            &file.unwrap_or_else(|| config.template.clone()),
            waves,
            config.strict,
        ),
        Commands::Plan {
            file,
            params,
            target,
            stack,
            state_dir,
            json,
        } => {
            let t = Target {
                file: file.unwrap_or_else(|| config.template.clone()),
                stack: select_stack(stack, config)?,
                state_dir: state_dir.unwrap_or_else(|| config.state_dir.clone()),
                params: &params,
                targets: &target,
            };
            cmd_plan(&t, config, json)
        }
        Commands::Apply {
            file,
            params,
            target,
            stack,
            state_dir,
            dry_run,
            no_rollback,
        } => {
            let t = Target {
                file: file.unwrap_or_else(|| config.template.clone()),
                stack: select_stack(stack, config)?,
                state_dir: state_dir.unwrap_or_else(|| config.state_dir.clone()),
                params: &params,
                targets: &target,
            };
            cmd_apply(&t, config, dry_run, config.rollback && !no_rollback)
        }
        Commands::Destroy {
            stack,
            state_dir,
            dry_run,
        } => cmd_destroy(
            &select_stack(stack, config)?,
            &state_dir.unwrap_or_else(|| config.state_dir.clone()),
            dry_run,
        ),
        Commands::Status { stack, state_dir } => {
            if let Some(stack) = &stack {
                config::validate_stack_name(stack)?;
            }
            cmd_status(
                &state_dir.unwrap_or_else(|| config.state_dir.clone()),
                stack.as_deref(),
            )
        }
        Commands::Graph { file, format } => cmd_graph(
            &file.unwrap_or_else(|| config.template.clone()),
            format,
            config.strict,
        ),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stackplan", &mut std::io::stdout());
            Ok(())
        }
    }
}

const STARTER_TEMPLATE: &str = r#"AWSTemplateFormatVersion: "2010-09-09"
Description: Web tier - VPC, two public subnets and an instance behind a load balancer

Parameters:
  VpcCidr:
    Type: String
    Default: 10.0.0.0/16
    AllowedPattern: '(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})'
    ConstraintDescription: must be an IPv4 CIDR block
  InstanceType:
    Type: String
    Default: t3.micro
    AllowedValues: [t3.micro, t3.small, t3.medium]
  ImageId:
    Type: AWS::EC2::Image::Id
    Default: ami-0123456789abcdef0

Resources:
  VPC:
    Type: AWS::EC2::VPC
    Properties:
      CidrBlock: !Ref VpcCidr
      EnableDnsHostnames: true

  InternetGateway:
    Type: AWS::EC2::InternetGateway

  GatewayAttachment:
    Type: AWS::EC2::VPCGatewayAttachment
    Properties:
      VpcId: !Ref VPC
      InternetGatewayId: !Ref InternetGateway

  SubnetA:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref VPC
      CidrBlock: 10.0.1.0/24
      AvailabilityZone: !Select [0, !GetAZs ""]
      MapPublicIpOnLaunch: true

  SubnetB:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref VPC
      CidrBlock: 10.0.2.0/24
      AvailabilityZone: !Select [1, !GetAZs ""]
      MapPublicIpOnLaunch: true

  RouteTable:
    Type: AWS::EC2::RouteTable
    Properties:
      VpcId: !Ref VPC

  DefaultRoute:
    Type: AWS::EC2::Route
    DependsOn: GatewayAttachment
    Properties:
      RouteTableId: !Ref RouteTable
      DestinationCidrBlock: 0.0.0.0/0
      GatewayId: !Ref InternetGateway

  SubnetARouteTableAssociation:
    Type: AWS::EC2::SubnetRouteTableAssociation
    Properties:
      SubnetId: !Ref SubnetA
      RouteTableId: !Ref RouteTable

  SubnetBRouteTableAssociation:
    Type: AWS::EC2::SubnetRouteTableAssociation
    Properties:
      SubnetId: !Ref SubnetB
      RouteTableId: !Ref RouteTable

  WebSecurityGroup:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: Allow HTTP from anywhere
      VpcId: !Ref VPC
      SecurityGroupIngress:
        - IpProtocol: tcp
          FromPort: 80
          ToPort: 80
          CidrIp: 0.0.0.0/0

  WebServer:
    Type: AWS::EC2::Instance
    Properties:
      InstanceType: !Ref InstanceType
      ImageId: !Ref ImageId
      SubnetId: !Ref SubnetA
      SecurityGroupIds:
        - !Ref WebSecurityGroup

  LoadBalancer:
    Type: AWS::ElasticLoadBalancingV2::LoadBalancer
    Properties:
      Scheme: internet-facing
      Subnets:
        - !Ref SubnetA
        - !Ref SubnetB
      SecurityGroups:
        - !Ref WebSecurityGroup

  TargetGroup:
    Type: AWS::ElasticLoadBalancingV2::TargetGroup
    Properties:
      Port: 80
      Protocol: HTTP
      VpcId: !Ref VPC
      Targets:
        - Id: !Ref WebServer

  Listener:
    Type: AWS::ElasticLoadBalancingV2::Listener
    Properties:
      LoadBalancerArn: !Ref LoadBalancer
      Port: 80
      Protocol: HTTP
      DefaultActions:
        - Type: forward
          TargetGroupArn: !Ref TargetGroup

Outputs:
  LoadBalancerDNS:
    Description: Public DNS name of the load balancer
    Value: !GetAtt LoadBalancer.DNSName
    Export:
      Name: !Sub "${AWS::StackName}-LoadBalancerDNS"
"#;

const STARTER_CONFIG: &str = r#"template = "template.yaml"
state_dir = "state"
stack = "web"
rollback = true

[parameters]
InstanceType = "t3.micro"
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let template_path = path.join("template.yaml");
    let config_path = path.join(CONFIG_FILE);
    for existing in [&template_path, &config_path] {
        if existing.exists() {
            return Err(Error::Config(format!("{} already exists", existing.display())));
        }
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| Error::io(&state_dir, e))?;
    std::fs::write(&template_path, STARTER_TEMPLATE).map_err(|e| Error::io(&template_path, e))?;
    std::fs::write(&config_path, STARTER_CONFIG).map_err(|e| Error::io(&config_path, e))?;

    println!("Initialized stackplan project at {}", path.display());
    println!("  Created: {}", template_path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

/// Print diagnostics to stderr; returns how many fail validation.
fn report_diagnostics(diagnostics: &[parser::Diagnostic], strict: bool) -> usize {
    for d in diagnostics {
        match d.severity {
            Severity::Error => eprintln!("  ERROR: {}", d),
            Severity::Warning => eprintln!("  WARNING: {}", d),
        }
    }
    parser::error_count(diagnostics, strict)
}

fn cmd_validate(file: &Path, strict: bool) -> Result<()> {
    let template = parser::parse_template_file(file)?;
    let diagnostics = parser::validate_template(&template);
    let errors = report_diagnostics(&diagnostics, strict);
    if errors > 0 {
        return Err(Error::Validation(errors));
    }
    println!(
        "OK: {} ({} parameters, {} resources, {} outputs)",
        file.display(),
        template.parameters.len(),
        template.resources.len(),
        template.outputs.len()
    );
    Ok(())
}

/// Parse and validate a template, failing on any validation error.
fn parse_and_validate(file: &Path, strict: bool) -> Result<Template> {
    let template = parser::parse_template_file(file)?;
    let diagnostics = parser::validate_template(&template);
    let errors = report_diagnostics(&diagnostics, strict);
    if errors > 0 {
        return Err(Error::Validation(errors));
    }
    Ok(template)
}

fn cmd_order(file: &Path, waves: bool, strict: bool) -> Result<()> {
    let template = parse_and_validate(file, strict)?;
    let graph = resolver::build_graph(&template);
    print!("{}", format_order(&graph, &template, waves)?);
    Ok(())
}

fn format_order(graph: &resolver::DependencyGraph, template: &Template, waves: bool) -> Result<String> {
    let mut out = String::new();
    if waves {
        for (i, wave) in graph.execution_waves()?.iter().enumerate() {
            let _ = writeln!(out, "Wave {}: {}", i + 1, wave.join(", "));
        }
    } else {
        for (i, id) in graph.execution_order()?.iter().enumerate() {
            let rtype = template
                .resources
                .get(id)
                .map(|r| r.resource_type.as_str())
                .unwrap_or("");
            let _ = writeln!(out, "{:>3}. {} ({})", i + 1, id, rtype);
        }
    }
    Ok(out)
}

/// Config defaults for declared parameters, then command-line overrides.
fn merge_parameters(
    template: &Template,
    config: &Config,
    cli_pairs: &[String],
) -> Result<ResolvedParameters> {
    let mut merged: IndexMap<String, String> = IndexMap::new();
    for (name, value) in &config.parameters {
        if template.parameters.contains_key(name) {
            merged.insert(name.clone(), value.clone());
        } else {
            tracing::debug!(parameter = %name, "config parameter not declared in template; ignored");
        }
    }
    merged.extend(params::parse_overrides(cli_pairs)?);
    params::resolve_parameters(template, &merged)
}

fn cmd_plan(t: &Target, config: &Config, json: bool) -> Result<()> {
    let template = parse_and_validate(&t.file, config.strict)?;
    let params = merge_parameters(&template, config, t.params)?;
    let graph = resolver::build_graph(&template);
    let lock = state::load_lock(&t.state_dir, &t.stack)?;

    let cs = planner::plan(&planner::PlanRequest {
        stack: &t.stack,
        template: &template,
        params: &params,
        graph: &graph,
        lock: lock.as_ref(),
        targets: t.targets,
    })?;

    if json {
        let text = serde_json::to_string_pretty(&cs).map_err(|e| Error::parse("change set", e))?;
        println!("{}", text);
    } else {
        print!("{}", format_plan(&cs, &params));
    }
    Ok(())
}

/// Render a change set for the terminal.
fn format_plan(cs: &ChangeSet, params: &ResolvedParameters) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Planning: {} ({} resources)", cs.stack, cs.execution_order.len());

    if !params.is_empty() {
        let _ = writeln!(out, "\nParameters:");
        for name in params.values().keys() {
            let _ = writeln!(out, "  {} = {}", name, params.display_value(name).unwrap_or(""));
        }
    }

    let _ = writeln!(out);
    for change in &cs.changes {
        let _ = writeln!(out, "  {} {}", change.action.symbol(), change.description);
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Plan: {} to add, {} to change, {} to replace, {} to destroy, {} unchanged.",
        cs.to_create, cs.to_update, cs.to_replace, cs.to_delete, cs.unchanged
    );
    out
}

fn cmd_apply(t: &Target, config: &Config, dry_run: bool, rollback: bool) -> Result<()> {
    let template = parse_and_validate(&t.file, config.strict)?;
    let params = merge_parameters(&template, config, t.params)?;
    let mut provisioner = StateOnly::new(&t.stack);

    let report = executor::apply(
        &executor::ApplyOptions {
            stack: &t.stack,
            template: &template,
            template_hash: Some(hasher::hash_file(&t.file)?),
            params: &params,
            state_dir: &t.state_dir,
            targets: t.targets,
            dry_run,
            rollback,
        },
        &mut provisioner,
    )?;

    print!("{}", format_plan(&report.changes, &params));
    let Some(result) = report.result else {
        println!("Dry run: no changes applied.");
        return Ok(());
    };

    println!(
        "Apply complete: {} applied, {} deleted, {} retained, {} unchanged ({:.1}s).",
        result.applied,
        result.deleted,
        result.retained,
        result.unchanged,
        result.total_duration.as_secs_f64()
    );
    if let Some(lock) = state::load_lock(&t.state_dir, &t.stack)? {
        print_outputs(&lock);
    }
    Ok(())
}

fn print_outputs(lock: &StackLock) {
    if lock.outputs.is_empty() {
        return;
    }
    println!();
    println!("Outputs:");
    for (name, value) in &lock.outputs {
        println!("  {} = {}", name, value);
    }
}

fn cmd_destroy(stack: &str, state_dir: &Path, dry_run: bool) -> Result<()> {
    let mut provisioner = StateOnly::new(stack);
    let report = executor::destroy(stack, state_dir, dry_run, &mut provisioner)?;

    for change in &report.changes.changes {
        println!("  {} {}", change.action.symbol(), change.description);
    }
    match report.result {
        None => println!("Dry run: {} resource(s) would be removed.", report.changes.to_delete),
        Some(result) => println!(
            "Destroy complete: {} deleted, {} retained.",
            result.deleted, result.retained
        ),
    }
    Ok(())
}

fn cmd_status(state_dir: &Path, stack_filter: Option<&str>) -> Result<()> {
    let stacks = match stack_filter {
        Some(stack) => vec![stack.to_string()],
        None => state::list_stacks(state_dir)?,
    };

    let mut found = false;
    for name in &stacks {
        let Some(lock) = state::load_lock(state_dir, name)? else {
            continue;
        };
        found = true;
        print!("{}", format_status(&lock));
        if let Some(last) = eventlog::read_events(state_dir, name)?.last() {
            let kind = serde_json::to_value(&last.event)
                .ok()
                .and_then(|v| v["event"].as_str().map(str::to_string))
                .unwrap_or_default();
            println!("  Last event: {} at {}", kind, last.ts);
        }
        println!();
    }

    if !found {
        println!("No state found. Run `stackplan apply` first.");
    }
    Ok(())
}

fn format_status(lock: &StackLock) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Stack: {}", lock.stack);
    let _ = writeln!(out, "  Generated: {}", lock.generated_at);
    let _ = writeln!(out, "  Generator: {}", lock.generator);
    if let Some(hash) = &lock.template_hash {
        let _ = writeln!(out, "  Template:  {}", hasher::short_hex(hash, 16));
    }
    let _ = writeln!(out, "  Resources: {}", lock.resources.len());
    for (id, rl) in &lock.resources {
        let physical = rl
            .physical_id
            .as_deref()
            .map(|p| format!(" {}", p))
            .unwrap_or_default();
        let _ = writeln!(out, "    {}: {} [{}]{}", id, rl.status, rl.resource_type, physical);
    }
    for (name, value) in &lock.outputs {
        let _ = writeln!(out, "  Output {} = {}", name, value);
    }
    out
}

fn cmd_graph(file: &Path, format: GraphFormat, strict: bool) -> Result<()> {
    let template = parse_and_validate(file, strict)?;
    let g = resolver::build_graph(&template);
    let rendered = match format {
        GraphFormat::Dot => graph::render_dot(&g, &template),
        GraphFormat::Mermaid => graph::render_mermaid(&g, &template),
    };
    print!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> (tempfile::TempDir, PathBuf, Config) {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let mut config = Config::from_file(&dir.path().join(CONFIG_FILE)).unwrap();
        config.template = dir.path().join("template.yaml");
        config.state_dir = dir.path().join("state");
        let file = config.template.clone();
        (dir, file, config)
    }

    fn target<'a>(file: &Path, config: &Config, params: &'a [String], targets: &'a [String]) -> Target<'a> {
        Target {
            file: file.to_path_buf(),
            stack: config.stack.clone(),
            state_dir: config.state_dir.clone(),
            params,
            targets,
        }
    }

    #[test]
    fn test_init() {
        let (dir, file, config) = project();
        assert!(file.exists());
        assert!(dir.path().join("state").is_dir());
        assert_eq!(config.stack, "web");
        assert_eq!(config.parameters["InstanceType"], "t3.micro");
    }

    #[test]
    fn test_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("template.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_starter_template_is_valid() {
        let template = parser::parse_template(STARTER_TEMPLATE).unwrap();
        let diagnostics = parser::validate_template(&template);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(template.resources.len(), 14);
    }

    #[test]
    fn test_validate_valid() {
        let (_dir, file, _config) = project();
        cmd_validate(&file, true).unwrap();
    }

    #[test]
    fn test_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.yaml");
        std::fs::write(
            &file,
            "Resources:\n  A:\n    Type: AWS::SQS::Queue\n    DependsOn: Ghost\n",
        )
        .unwrap();
        assert!(matches!(cmd_validate(&file, false), Err(Error::Validation(1))));
    }

    #[test]
    fn test_order_starter() {
        let template = parser::parse_template(STARTER_TEMPLATE).unwrap();
        let g = resolver::build_graph(&template);
        let order = format_order(&g, &template, false).unwrap();
        let pos = |name: &str| order.find(&format!(" {} (", name)).unwrap();
        assert!(pos("VPC") < pos("SubnetA"));
        assert!(pos("GatewayAttachment") < pos("DefaultRoute"));
        assert!(pos("TargetGroup") < pos("Listener"));
        assert!(pos("WebServer") < pos("TargetGroup"));

        let waves = format_order(&g, &template, true).unwrap();
        assert!(waves.starts_with("Wave 1: InternetGateway, VPC\n"));
    }

    #[test]
    fn test_plan_then_apply_then_noop() {
        let (_dir, file, config) = project();
        let t = target(&file, &config, &[], &[]);
        cmd_plan(&t, &config, false).unwrap();
        cmd_plan(&t, &config, true).unwrap();
        cmd_apply(&t, &config, false, true).unwrap();

        let lock = state::load_lock(&config.state_dir, "web").unwrap().unwrap();
        assert_eq!(lock.resources.len(), 14);
        assert!(lock.outputs["LoadBalancerDNS"].ends_with(".DNSName"));

        let template = parser::parse_template_file(&file).unwrap();
        let params = merge_parameters(&template, &config, &[]).unwrap();
        let graph = resolver::build_graph(&template);
        let cs = planner::plan(&planner::PlanRequest {
            stack: "web",
            template: &template,
            params: &params,
            graph: &graph,
            lock: Some(&lock),
            targets: &[],
        })
        .unwrap();
        assert_eq!(cs.unchanged, 14);
    }

    #[test]
    fn test_apply_param_override() {
        let (_dir, file, config) = project();
        cmd_apply(&target(&file, &config, &[], &[]), &config, false, true).unwrap();
        let params = vec!["InstanceType=t3.small".to_string()];
        let template = parser::parse_template_file(&file).unwrap();
        let resolved = merge_parameters(&template, &config, &params).unwrap();
        assert_eq!(resolved.get("InstanceType"), Some("t3.small"));

        let before = state::load_lock(&config.state_dir, "web").unwrap().unwrap();
        cmd_apply(&target(&file, &config, &params, &[]), &config, false, true).unwrap();
        let after = state::load_lock(&config.state_dir, "web").unwrap().unwrap();
        assert_ne!(after.resources["WebServer"].hash, before.resources["WebServer"].hash);
        assert_eq!(after.resources["VPC"].hash, before.resources["VPC"].hash);
    }

    #[test]
    fn test_apply_rejects_bad_param() {
        let (_dir, file, config) = project();
        let params = vec!["InstanceType=m5.24xlarge".to_string()];
        let err = cmd_apply(&target(&file, &config, &params, &[]), &config, false, true).unwrap_err();
        assert!(matches!(err, Error::Parameter { .. }));
    }

    #[test]
    fn test_apply_dry_run_and_target() {
        let (_dir, file, config) = project();
        let targets = vec!["SubnetA".to_string()];
        cmd_apply(&target(&file, &config, &[], &targets), &config, true, true).unwrap();
        assert!(state::load_lock(&config.state_dir, "web").unwrap().is_none());

        cmd_apply(&target(&file, &config, &[], &targets), &config, false, true).unwrap();
        let lock = state::load_lock(&config.state_dir, "web").unwrap().unwrap();
        let keys: Vec<&String> = lock.resources.keys().collect();
        assert_eq!(keys, vec!["VPC", "SubnetA"]);
    }

    #[test]
    fn test_format_plan_symbols() {
        let template = parser::parse_template(STARTER_TEMPLATE).unwrap();
        let params = params::resolve_parameters(&template, &IndexMap::new()).unwrap();
        let graph = resolver::build_graph(&template);
        let cs = planner::plan(&planner::PlanRequest {
            stack: "web",
            template: &template,
            params: &params,
            graph: &graph,
            lock: None,
            targets: &[],
        })
        .unwrap();
        let out = format_plan(&cs, &params);
        assert!(out.contains("  + VPC: create AWS::EC2::VPC"));
        assert!(out.contains("  InstanceType = t3.micro"));
        assert!(out.ends_with(
            "Plan: 14 to add, 0 to change, 0 to replace, 0 to destroy, 0 unchanged.\n"
        ));
    }

    #[test]
    fn test_destroy_and_status() {
        let (_dir, file, config) = project();
        cmd_status(&config.state_dir, None).unwrap();
        cmd_apply(&target(&file, &config, &[], &[]), &config, false, true).unwrap();

        let lock = state::load_lock(&config.state_dir, "web").unwrap().unwrap();
        let status = format_status(&lock);
        assert!(status.starts_with("Stack: web\n"));
        assert!(status.contains("    VPC: APPLIED [AWS::EC2::VPC] vpc-"));
        cmd_status(&config.state_dir, Some("web")).unwrap();

        cmd_destroy("web", &config.state_dir, true).unwrap();
        assert!(state::load_lock(&config.state_dir, "web").unwrap().is_some());
        cmd_destroy("web", &config.state_dir, false).unwrap();
        assert!(state::load_lock(&config.state_dir, "web").unwrap().is_none());
        assert!(cmd_destroy("web", &config.state_dir, false).is_err());
    }

    #[test]
    fn test_graph_formats() {
        let (_dir, file, _config) = project();
        cmd_graph(&file, GraphFormat::Dot, false).unwrap();
        cmd_graph(&file, GraphFormat::Mermaid, false).unwrap();
    }

    #[test]
    fn test_order_and_graph_honour_strict() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("template.yaml");
        // Host bits set: a warning only
        std::fs::write(
            &file,
            "Resources:\n  VPC:\n    Type: AWS::EC2::VPC\n    Properties:\n      CidrBlock: 10.0.0.1/16\n",
        )
        .unwrap();
        cmd_order(&file, false, false).unwrap();
        cmd_graph(&file, GraphFormat::Dot, false).unwrap();
        assert!(matches!(cmd_order(&file, false, true), Err(Error::Validation(1))));
        assert!(matches!(
            cmd_graph(&file, GraphFormat::Dot, true),
            Err(Error::Validation(1))
        ));
    }

    #[test]
    fn test_stack_flag_must_not_be_a_path() {
        let (dir, file, config) = project();
        let err = dispatch(
            Commands::Apply {
                file: Some(file),
                params: Vec::new(),
                target: Vec::new(),
                stack: Some("../escaped".to_string()),
                state_dir: None,
                dry_run: false,
                no_rollback: false,
            },
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!dir.path().join("escaped").exists());

        for stack in ["a/b", ".."] {
            let destroy = Commands::Destroy {
                stack: Some(stack.to_string()),
                state_dir: None,
                dry_run: true,
            };
            assert!(matches!(dispatch(destroy, &config), Err(Error::Config(_))));
            let status = Commands::Status {
                stack: Some(stack.to_string()),
                state_dir: None,
            };
            assert!(matches!(dispatch(status, &config), Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "stackplan", "-vv", "plan", "-f", "t.yaml", "-p", "A=1", "-p", "B=2", "--target", "Web",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Plan { params, target, .. } => {
                assert_eq!(params, vec!["A=1", "B=2"]);
                assert_eq!(target, vec!["Web"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
        Cli::command().debug_assert();
    }
}
