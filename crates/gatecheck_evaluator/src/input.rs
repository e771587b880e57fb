// SPDX-License-Identifier: Apache-2.0

//! Policy input construction.
//!
//! The automation scanner is an external collaborator: its JSON output is
//! deserialized into the typed scan model below, then fanned out into one
//! [`PolicyInput`] per focal entity (project, task, play, role). Runtime
//! inputs (task results, events, REST requests) arrive as JSON objects from
//! their adapters.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Error;

/// Input kind discriminators.
pub const INPUT_TYPE_TASK: &str = "task";
/// See [`INPUT_TYPE_TASK`].
pub const INPUT_TYPE_PLAY: &str = "play";
/// See [`INPUT_TYPE_TASK`].
pub const INPUT_TYPE_ROLE: &str = "role";
/// See [`INPUT_TYPE_TASK`].
pub const INPUT_TYPE_PROJECT: &str = "project";
/// See [`INPUT_TYPE_TASK`].
pub const INPUT_TYPE_TASK_RESULT: &str = "task_result";
/// See [`INPUT_TYPE_TASK`].
pub const INPUT_TYPE_EVENT: &str = "event";
/// See [`INPUT_TYPE_TASK`].
pub const INPUT_TYPE_REST: &str = "rest";

/// The reserved key carrying the whole input alongside the focal entity's
/// fields in the serialized input document.
pub const INPUT_CARRIER_KEY: &str = "_gatecheck";

/// A scanned task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Task {
    /// Entity kind, always `task`.
    pub r#type: String,
    /// Scanner-assigned key.
    pub key: String,
    /// The task name.
    pub name: String,
    /// The module name as written in the source.
    pub module: String,
    /// Position of the task in its file.
    pub index: i64,
    /// Position of the enclosing play, if any.
    pub play_index: i64,
    /// Source file of the task, relative to the project root.
    pub filepath: String,
    /// Owning role, if any.
    pub role: String,
    /// Owning collection, if any.
    pub collection: String,
    /// Privilege escalation info.
    pub r#become: Option<Value>,
    /// Variables visible to the task.
    pub variables: Map<String, Value>,
    /// Task-level options (`become`, `when`, ...).
    pub options: Map<String, Value>,
    /// The module arguments.
    pub module_options: Value,
    /// The raw YAML text of the task.
    pub yaml_lines: String,
    /// `[begin, end]` line numbers in the source file, when the scanner
    /// provides them.
    pub line_num_in_file: Vec<usize>,
    /// The fully-qualified module name, resolved from external data.
    pub module_fqcn: String,
}

/// A scanned play.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Play {
    /// Entity kind, always `play`.
    pub r#type: String,
    /// The play name.
    pub name: String,
    /// Source file of the play.
    pub filepath: String,
    /// Position of the play in its playbook.
    pub index: i64,
    /// Scanner-assigned key.
    pub key: String,
    /// Owning role, if any.
    pub role: String,
    /// Owning collection, if any.
    pub collection: String,
    /// The play's tasks.
    pub tasks: Vec<Task>,
    /// Play-level options (`hosts`, `become`, ...).
    pub options: Map<String, Value>,
    /// Variables declared by the play.
    pub variables: Map<String, Value>,
    /// `vars_files` entries of the play.
    pub vars_files: Vec<String>,
}

/// A scanned playbook.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Playbook {
    /// Entity kind, always `playbook`.
    pub r#type: String,
    /// Scanner-assigned key.
    pub key: String,
    /// The playbook name.
    pub name: String,
    /// Source file of the playbook.
    pub filepath: String,
    /// The raw YAML text of the playbook.
    pub yaml_lines: String,
    /// Variables declared by the playbook.
    pub variables: Map<String, Value>,
    /// Playbook options.
    pub options: Map<String, Value>,
    /// Tasks of every play, flattened.
    pub tasks: Vec<Task>,
    /// The plays.
    pub plays: Vec<Play>,
}

/// A scanned task file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskFile {
    /// Entity kind, always `taskfile`.
    pub r#type: String,
    /// Scanner-assigned key.
    pub key: String,
    /// The task file name.
    pub name: String,
    /// Source file path.
    pub filepath: String,
    /// The raw YAML text of the file.
    pub yaml_lines: String,
    /// Variables declared by the file.
    pub variables: Map<String, Value>,
    /// File-level options.
    pub options: Map<String, Value>,
    /// The tasks.
    pub tasks: Vec<Task>,
}

/// A scanned role.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Role {
    /// Entity kind, always `role`.
    pub r#type: String,
    /// Scanner-assigned key.
    pub key: String,
    /// The role name.
    pub name: String,
    /// Root path of the role.
    pub filepath: String,
    /// The fully-qualified role name.
    pub fqcn: String,
    /// Owning collection, if any.
    pub collection: String,
    /// The role's default variables.
    pub default_variables: Map<String, Value>,
    /// Variables declared by the role.
    pub variables: Map<String, Value>,
    /// Role options.
    pub options: Map<String, Value>,
    /// Task files keyed by path.
    pub taskfiles: BTreeMap<String, TaskFile>,
}

/// A scanned vars file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VarsFile {
    /// Entity kind, always `file`.
    pub r#type: String,
    /// The file name.
    pub name: String,
    /// Scanner-assigned key.
    pub key: String,
    /// Source file path.
    pub filepath: String,
    /// The parsed file contents, when parseable.
    pub data: Option<Value>,
}

/// Project-level metadata from the scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Project {
    /// Entity kind, always `project`.
    pub r#type: String,
    /// Scanner-assigned key.
    pub key: String,
    /// The project name.
    pub name: String,
    /// Root path of the project.
    pub filepath: String,
    /// Collection requirements.
    pub requirements: Map<String, Value>,
}

/// The external scanner's output for one project.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanResult {
    /// Scan source metadata.
    pub source: Map<String, Value>,
    /// Scanned playbooks.
    pub playbooks: Vec<Playbook>,
    /// Scanned standalone task files.
    pub taskfiles: Vec<TaskFile>,
    /// Scanned roles.
    pub roles: Vec<Role>,
    /// Scanned vars files.
    pub files: Vec<VarsFile>,
    /// Project metadata.
    pub project: Option<Project>,
    /// Variables the scanner derived from the project trees.
    pub variables: Map<String, Value>,
}

impl ScanResult {
    /// Loads a scan result from the scanner's JSON output file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ScanResult, Error> {
        let path_str = path.as_ref().display().to_string();
        let content = fs::read_to_string(path).map_err(|e| Error::ScanError {
            path: path_str.clone(),
            error: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| Error::ScanError {
            path: path_str,
            error: e.to_string(),
        })
    }
}

/// A runtime event (from an event watcher adapter).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Event {
    /// Entity kind, always `event`.
    pub r#type: String,
    /// The event id.
    pub uuid: String,
    /// The event name.
    pub name: String,
    /// The source file the event refers to, if any.
    pub task_path: String,
    /// The source line the event refers to, if any.
    pub line: Option<usize>,
    /// The event payload.
    pub data: Map<String, Value>,
}

/// A REST request (from an HTTP hook adapter).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiRequest {
    /// Entity kind, always `rest`.
    pub r#type: String,
    /// The request path.
    pub path: String,
    /// The request method.
    pub method: String,
    /// The request headers.
    pub headers: Map<String, Value>,
    /// The request payload.
    pub payload: Value,
}

/// Externally provided variables, layered on top of the scan-derived ones.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Variables {
    /// Task-scoped variables.
    pub task_vars: Map<String, Value>,
    /// Play-scoped variables.
    pub play_vars: Map<String, Value>,
    /// Role-scoped variables.
    pub role_vars: Map<String, Value>,
    /// Role default variables.
    pub role_defaults: Map<String, Value>,
    /// Extra vars (highest precedence).
    pub extra_vars: Map<String, Value>,
    /// Gathered facts.
    pub facts: Map<String, Value>,
    /// Non-persistent facts (registered vars, set facts).
    pub np_facts: Map<String, Value>,
}

impl Variables {
    /// Loads a variables file (a JSON object of the fields above).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Variables, Error> {
        let path_str = path.as_ref().display().to_string();
        let content = fs::read_to_string(path).map_err(|e| Error::ScanError {
            path: path_str.clone(),
            error: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| Error::ScanError {
            path: path_str,
            error: e.to_string(),
        })
    }
}

/// Data read from an automation runtime directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeData {
    /// Contents of `env/extravars`.
    pub extra_vars: Map<String, Value>,
    /// Contents of `env/envvars`.
    pub env_vars: Map<String, Value>,
    /// Contents of `inventory/hosts`.
    pub inventory: Map<String, Value>,
}

impl RuntimeData {
    /// Loads the runtime data files that exist under `dir`; missing or
    /// unparseable files yield empty maps.
    #[must_use]
    pub fn load(dir: &Path) -> RuntimeData {
        RuntimeData {
            extra_vars: load_yaml_map(&dir.join("env/extravars")),
            env_vars: load_yaml_map(&dir.join("env/envvars")),
            inventory: load_yaml_map(&dir.join("inventory/hosts")),
        }
    }
}

fn load_yaml_map(path: &Path) -> Map<String, Value> {
    let Ok(content) = fs::read_to_string(path) else {
        return Map::new();
    };
    let Ok(parsed) = serde_yaml::from_str::<serde_yaml::Value>(&content) else {
        return Map::new();
    };
    match serde_json::to_value(parsed) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// The project-wide context shared by scan-derived inputs.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProjectContext {
    /// Scan source metadata.
    pub source: Map<String, Value>,
    /// Playbooks keyed by file path.
    pub playbooks: BTreeMap<String, Playbook>,
    /// Task files keyed by file path.
    pub taskfiles: BTreeMap<String, TaskFile>,
    /// Roles keyed by file path.
    pub roles: BTreeMap<String, Role>,
    /// Vars files keyed by file path.
    pub vars_files: BTreeMap<String, VarsFile>,
    /// Extra vars from the runtime directory.
    pub extra_vars: Map<String, Value>,
    /// The layered variable map used for `{{ var }}` resolution.
    pub variables: Map<String, Value>,
    /// Project metadata.
    pub project: Option<Project>,
}

/// One policy evaluation input: a discriminator plus exactly one focal
/// entity.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyInput {
    /// The full-project view.
    Project {
        /// The shared project context.
        #[serde(flatten)]
        context: Box<ProjectContext>,
    },
    /// A single task.
    Task {
        /// The shared project context.
        #[serde(flatten)]
        context: Box<ProjectContext>,
        /// The focal task.
        task: Task,
    },
    /// A single play.
    Play {
        /// The shared project context.
        #[serde(flatten)]
        context: Box<ProjectContext>,
        /// The focal play.
        play: Play,
    },
    /// A single role.
    Role {
        /// The shared project context.
        #[serde(flatten)]
        context: Box<ProjectContext>,
        /// The focal role.
        role: Role,
    },
    /// A task result from a live run.
    TaskResult {
        /// The task result object, as serialized by the runtime adapter.
        task_result: Value,
        /// Variables visible at the time of the result.
        variables: Map<String, Value>,
    },
    /// A runtime event.
    Event {
        /// The focal event.
        event: Event,
    },
    /// A REST request.
    Rest {
        /// The focal request.
        rest: ApiRequest,
    },
}

impl PolicyInput {
    /// The input kind discriminator.
    #[must_use]
    pub fn input_type(&self) -> &'static str {
        match self {
            PolicyInput::Project { .. } => INPUT_TYPE_PROJECT,
            PolicyInput::Task { .. } => INPUT_TYPE_TASK,
            PolicyInput::Play { .. } => INPUT_TYPE_PLAY,
            PolicyInput::Role { .. } => INPUT_TYPE_ROLE,
            PolicyInput::TaskResult { .. } => INPUT_TYPE_TASK_RESULT,
            PolicyInput::Event { .. } => INPUT_TYPE_EVENT,
            PolicyInput::Rest { .. } => INPUT_TYPE_REST,
        }
    }

    /// The name of the focal entity, used when reporting results.
    #[must_use]
    pub fn object_name(&self) -> Option<String> {
        match self {
            PolicyInput::Project { context } => {
                context.project.as_ref().map(|p| p.name.clone())
            }
            PolicyInput::Task { task, .. } => Some(task.name.clone()),
            PolicyInput::Play { play, .. } => Some(play.name.clone()),
            PolicyInput::Role { role, .. } => Some(role.name.clone()),
            PolicyInput::TaskResult { task_result, .. } => task_result
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_owned),
            PolicyInput::Event { event } => Some(event.name.clone()),
            PolicyInput::Rest { rest } => Some(rest.path.clone()),
        }
    }

    /// The source file path of the focal entity, if it has one.
    #[must_use]
    pub fn object_filepath(&self) -> Option<String> {
        match self {
            PolicyInput::Project { context } => {
                context.project.as_ref().map(|p| p.filepath.clone())
            }
            PolicyInput::Task { task, .. } => Some(task.filepath.clone()),
            PolicyInput::Play { play, .. } => Some(play.filepath.clone()),
            PolicyInput::Role { role, .. } => Some(role.filepath.clone()),
            PolicyInput::TaskResult { task_result, .. } => task_result
                .get("filepath")
                .and_then(Value::as_str)
                .map(str::to_owned),
            PolicyInput::Event { .. } | PolicyInput::Rest { .. } => None,
        }
    }

    /// The layered variable map of the input, when it carries one.
    #[must_use]
    pub fn variables(&self) -> Option<&Map<String, Value>> {
        match self {
            PolicyInput::Project { context }
            | PolicyInput::Task { context, .. }
            | PolicyInput::Play { context, .. }
            | PolicyInput::Role { context, .. } => Some(&context.variables),
            PolicyInput::TaskResult { variables, .. } => Some(variables),
            PolicyInput::Event { .. } | PolicyInput::Rest { .. } => None,
        }
    }

    /// Serializes the input for the engine: the focal entity's fields at the
    /// top level, plus the whole input under [`INPUT_CARRIER_KEY`].
    pub fn to_json(&self) -> Result<String, Error> {
        let mut data = match self {
            PolicyInput::Task { context, task } => {
                let block = task_data_block(task);
                match resolve_value(&Value::Object(block), &context.variables) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                }
            }
            PolicyInput::Play { play, .. } => play.options.clone(),
            PolicyInput::TaskResult {
                task_result,
                variables,
            } => {
                let mut map = match task_result {
                    Value::Object(map) => match resolve_value(
                        &Value::Object(map.clone()),
                        variables,
                    ) {
                        Value::Object(resolved) => resolved,
                        _ => Map::new(),
                    },
                    _ => Map::new(),
                };
                _ = map.insert("variables".to_owned(), Value::Object(variables.clone()));
                map
            }
            PolicyInput::Event { event } => match serde_json::to_value(event) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            PolicyInput::Rest { rest } => match serde_json::to_value(rest) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            PolicyInput::Project { .. } | PolicyInput::Role { .. } => Map::new(),
        };

        let carrier = serde_json::to_value(self).map_err(|e| Error::InputError {
            error: format!("failed to serialize policy input: {e}"),
        })?;
        _ = data.insert(INPUT_CARRIER_KEY.to_owned(), carrier);
        serde_json::to_string(&Value::Object(data)).map_err(|e| Error::InputError {
            error: format!("failed to serialize policy input: {e}"),
        })
    }
}

/// Rebuilds the task's own YAML mapping: the module name with its options,
/// plus the task-level options.
fn task_data_block(task: &Task) -> Map<String, Value> {
    if !task.yaml_lines.is_empty() {
        if let Ok(parsed) = serde_yaml::from_str::<serde_yaml::Value>(&task.yaml_lines) {
            if let Ok(Value::Array(items)) = serde_json::to_value(parsed) {
                if let Some(Value::Object(map)) = items.into_iter().next() {
                    return map;
                }
            }
        }
    }
    let mut map = task.options.clone();
    if !task.module.is_empty() {
        _ = map.insert(task.module.clone(), task.module_options.clone());
    }
    map
}

/// A set of policy inputs grouped by input kind, in evaluation order.
pub type PolicyInputSet = Vec<(String, Vec<PolicyInput>)>;

/// Builds the per-kind inputs for a scanned project.
#[must_use]
pub fn inputs_from_scan_result(
    scan: &ScanResult,
    runtime_data: Option<&RuntimeData>,
    variables: Option<&Variables>,
) -> PolicyInputSet {
    let context = build_context(scan, runtime_data, variables);

    let mut tasks: Vec<Task> = Vec::new();
    for playbook in context.playbooks.values() {
        tasks.extend(playbook.tasks.iter().cloned());
    }
    for taskfile in context.taskfiles.values() {
        tasks.extend(taskfile.tasks.iter().cloned());
    }
    for role in context.roles.values() {
        for taskfile in role.taskfiles.values() {
            tasks.extend(taskfile.tasks.iter().cloned());
        }
    }
    let task_inputs: Vec<PolicyInput> = tasks
        .into_iter()
        .map(|task| PolicyInput::Task {
            context: Box::new(context.clone()),
            task,
        })
        .collect();

    let mut plays: Vec<Play> = Vec::new();
    for playbook in context.playbooks.values() {
        plays.extend(playbook.plays.iter().cloned());
    }
    let play_inputs: Vec<PolicyInput> = plays
        .into_iter()
        .map(|play| PolicyInput::Play {
            context: Box::new(context.clone()),
            play,
        })
        .collect();

    let role_inputs: Vec<PolicyInput> = context
        .roles
        .values()
        .cloned()
        .map(|role| PolicyInput::Role {
            context: Box::new(context.clone()),
            role,
        })
        .collect();

    let project_input = PolicyInput::Project {
        context: Box::new(context),
    };

    vec![
        (INPUT_TYPE_TASK.to_owned(), task_inputs),
        (INPUT_TYPE_PLAY.to_owned(), play_inputs),
        (INPUT_TYPE_ROLE.to_owned(), role_inputs),
        (INPUT_TYPE_PROJECT.to_owned(), vec![project_input]),
    ]
}

/// Builds the input set for a single task result object.
#[must_use]
pub fn inputs_from_task_result(
    task_result: Value,
    variables: Map<String, Value>,
) -> PolicyInputSet {
    vec![(
        INPUT_TYPE_TASK_RESULT.to_owned(),
        vec![PolicyInput::TaskResult {
            task_result,
            variables,
        }],
    )]
}

/// Builds the input set for a runtime event.
#[must_use]
pub fn inputs_from_event(event: Event) -> PolicyInputSet {
    vec![(
        INPUT_TYPE_EVENT.to_owned(),
        vec![PolicyInput::Event { event }],
    )]
}

/// Builds the input set for a REST request.
#[must_use]
pub fn inputs_from_rest(rest: ApiRequest) -> PolicyInputSet {
    vec![(INPUT_TYPE_REST.to_owned(), vec![PolicyInput::Rest { rest }])]
}

fn build_context(
    scan: &ScanResult,
    runtime_data: Option<&RuntimeData>,
    variables: Option<&Variables>,
) -> ProjectContext {
    let playbooks: BTreeMap<String, Playbook> = scan
        .playbooks
        .iter()
        .map(|p| (p.filepath.clone(), p.clone()))
        .collect();
    let taskfiles: BTreeMap<String, TaskFile> = scan
        .taskfiles
        .iter()
        .map(|t| (t.filepath.clone(), t.clone()))
        .collect();
    let roles: BTreeMap<String, Role> = scan
        .roles
        .iter()
        .map(|r| (r.filepath.clone(), r.clone()))
        .collect();
    let vars_files: BTreeMap<String, VarsFile> = scan
        .files
        .iter()
        .map(|f| (f.filepath.clone(), f.clone()))
        .collect();

    // Variable layering, lowest to highest precedence: scan-derived
    // defaults, vars-files contents, runtime extra vars, explicit overrides.
    let mut layered = scan.variables.clone();
    for file in vars_files.values() {
        if let Some(Value::Object(data)) = &file.data {
            for (key, value) in data {
                _ = layered.insert(key.clone(), value.clone());
            }
        }
    }
    let extra_vars = runtime_data
        .map(|rd| rd.extra_vars.clone())
        .unwrap_or_default();
    for (key, value) in &extra_vars {
        _ = layered.insert(key.clone(), value.clone());
    }
    if let Some(variables) = variables {
        for (key, value) in &variables.extra_vars {
            _ = layered.insert(key.clone(), value.clone());
        }
    }

    ProjectContext {
        source: scan.source.clone(),
        playbooks,
        taskfiles,
        roles,
        vars_files,
        extra_vars,
        variables: layered,
        project: scan.project.clone(),
    }
}

/// Loads the `galaxy` section of an external data file.
pub fn load_galaxy_data<P: AsRef<Path>>(path: P) -> Result<Map<String, Value>, Error> {
    let path_str = path.as_ref().display().to_string();
    let content = fs::read_to_string(path).map_err(|e| Error::ScanError {
        path: path_str.clone(),
        error: e.to_string(),
    })?;
    let parsed: Value = serde_json::from_str(&content).map_err(|e| Error::ScanError {
        path: path_str,
        error: e.to_string(),
    })?;
    match parsed.get("galaxy") {
        Some(Value::Object(map)) => Ok(map.clone()),
        _ => Ok(Map::new()),
    }
}

/// Resolves a task's module name to its fully-qualified form using the
/// galaxy module-name mappings. Already-qualified names are untouched; the
/// first mapping candidate wins.
pub fn embed_module_fqcn(task: &mut Task, galaxy: &Map<String, Value>) {
    if task.module.contains('.') || task.module_fqcn.contains('.') {
        return;
    }
    let candidate = galaxy
        .get("module_name_mappings")
        .and_then(|mappings| mappings.get(&task.module))
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(Value::as_str);
    if let Some(fqcn) = candidate {
        if fqcn.contains('.') {
            task.module_fqcn = fqcn.to_owned();
        }
    }
}

/// Resolves module FQCNs for every task of the input set.
pub fn process_inputs_with_external_data(
    inputs: &mut PolicyInputSet,
    galaxy: &Map<String, Value>,
) {
    for (_, inputs_per_kind) in inputs.iter_mut() {
        for input in inputs_per_kind.iter_mut() {
            match input {
                PolicyInput::Task { context, task } => {
                    embed_module_fqcn(task, galaxy);
                    embed_context_fqcns(context, galaxy);
                }
                PolicyInput::Project { context }
                | PolicyInput::Play { context, .. }
                | PolicyInput::Role { context, .. } => embed_context_fqcns(context, galaxy),
                _ => {}
            }
        }
    }
}

fn embed_context_fqcns(context: &mut ProjectContext, galaxy: &Map<String, Value>) {
    for playbook in context.playbooks.values_mut() {
        for task in playbook.tasks.iter_mut() {
            embed_module_fqcn(task, galaxy);
        }
        for play in playbook.plays.iter_mut() {
            for task in play.tasks.iter_mut() {
                embed_module_fqcn(task, galaxy);
            }
        }
    }
    for taskfile in context.taskfiles.values_mut() {
        for task in taskfile.tasks.iter_mut() {
            embed_module_fqcn(task, galaxy);
        }
    }
    for role in context.roles.values_mut() {
        for taskfile in role.taskfiles.values_mut() {
            for task in taskfile.tasks.iter_mut() {
                embed_module_fqcn(task, galaxy);
            }
        }
    }
}

const MAX_RESOLUTION_DEPTH: usize = 10;

/// Recursively resolves `{{ var }}` placeholders in a JSON value using the
/// layered variable map, repeating until a fixed point.
#[must_use]
pub fn resolve_value(data: &Value, variables: &Map<String, Value>) -> Value {
    if variables.is_empty() {
        return data.clone();
    }
    resolve_value_inner(data, variables, 0)
}

fn resolve_value_inner(data: &Value, variables: &Map<String, Value>, depth: usize) -> Value {
    if depth >= MAX_RESOLUTION_DEPTH {
        return data.clone();
    }
    match data {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    (key.clone(), resolve_value_inner(value, variables, depth))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value_inner(item, variables, depth))
                .collect(),
        ),
        Value::String(text) => resolve_text(text, variables, depth),
        _ => data.clone(),
    }
}

fn resolve_text(text: &str, variables: &Map<String, Value>, depth: usize) -> Value {
    if !text.contains("{{") || depth >= MAX_RESOLUTION_DEPTH {
        return Value::String(text.to_owned());
    }
    let placeholder = Regex::new(r"\{\{\s*([a-zA-Z0-9_]+)\s*\}\}").expect("a valid regex literal");

    for captures in placeholder.captures_iter(text) {
        let full_match = captures.get(0).expect("match").as_str();
        let name = &captures[1];
        let Some(resolved) = variables.get(name) else {
            continue;
        };

        let result = match resolved {
            // A singleton list collapses to its element.
            Value::Array(items) if items.len() == 1 => {
                substitute_one(text, full_match, &items[0])
            }
            // Longer lists fan out to one resolved value per element.
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| substitute_one(text, full_match, item))
                    .collect(),
            ),
            scalar => substitute_one(text, full_match, scalar),
        };

        // Re-resolve in case the substitution produced further placeholders
        // or the text still carries other variables.
        return resolve_value_inner(&result, variables, depth + 1);
    }

    Value::String(text.to_owned())
}

/// Substitutes one placeholder occurrence: an exact placeholder keeps the
/// resolved value's type, an embedded one stringifies it.
fn substitute_one(text: &str, full_match: &str, resolved: &Value) -> Value {
    if text == full_match {
        resolved.clone()
    } else {
        Value::String(text.replace(full_match, &stringify(resolved)))
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.clone()))
            .collect()
    }

    #[test]
    fn test_scalar_resolution_is_idempotent() {
        let variables = vars(&[("x", json!("v"))]);
        let once = resolve_value(&json!("{{ x }}"), &variables);
        assert_eq!(once, json!("v"));
        let twice = resolve_value(&once, &variables);
        assert_eq!(twice, json!("v"));
    }

    #[test]
    fn test_embedded_resolution_stringifies() {
        let variables = vars(&[("port", json!(8080))]);
        assert_eq!(
            resolve_value(&json!("host:{{ port }}"), &variables),
            json!("host:8080")
        );
    }

    #[test]
    fn test_singleton_list_collapses() {
        let variables = vars(&[("pkg", json!(["mysql"]))]);
        assert_eq!(resolve_value(&json!("{{ pkg }}"), &variables), json!("mysql"));
    }

    #[test]
    fn test_list_fans_out() {
        let variables = vars(&[("pkg", json!(["mysql", "nginx"]))]);
        assert_eq!(
            resolve_value(&json!("install {{ pkg }}"), &variables),
            json!(["install mysql", "install nginx"])
        );
    }

    #[test]
    fn test_chained_resolution_reaches_fixed_point() {
        let variables = vars(&[("a", json!("{{ b }}")), ("b", json!("final"))]);
        assert_eq!(resolve_value(&json!("{{ a }}"), &variables), json!("final"));
    }

    #[test]
    fn test_unknown_variables_are_left_alone() {
        let variables = vars(&[("x", json!("v"))]);
        assert_eq!(
            resolve_value(&json!("{{ unknown }}"), &variables),
            json!("{{ unknown }}")
        );
    }

    #[test]
    fn test_multiple_variables_in_one_string() {
        let variables = vars(&[("a", json!("A")), ("b", json!("B"))]);
        assert_eq!(
            resolve_value(&json!("{{ a }}-{{ b }}"), &variables),
            json!("A-B")
        );
    }

    #[test]
    fn test_embed_module_fqcn() {
        let galaxy: Map<String, Value> = vars(&[(
            "module_name_mappings",
            json!({ "package": ["ansible.builtin.package", "legacy.package"] }),
        )]);
        let mut task = Task {
            module: "package".to_owned(),
            ..Task::default()
        };
        embed_module_fqcn(&mut task, &galaxy);
        assert_eq!(task.module_fqcn, "ansible.builtin.package");

        // Already-qualified modules are untouched.
        let mut task = Task {
            module: "community.general.ufw".to_owned(),
            ..Task::default()
        };
        embed_module_fqcn(&mut task, &galaxy);
        assert!(task.module_fqcn.is_empty());
    }

    fn sample_scan() -> ScanResult {
        let task = Task {
            r#type: "task".to_owned(),
            name: "Install nginx".to_owned(),
            module: "package".to_owned(),
            filepath: "site.yml".to_owned(),
            module_options: json!({ "name": "{{ pkg }}", "state": "present" }),
            yaml_lines: "- name: Install nginx\n  package:\n    name: \"{{ pkg }}\"\n    state: present\n".to_owned(),
            ..Task::default()
        };
        let play = Play {
            r#type: "play".to_owned(),
            name: "web".to_owned(),
            filepath: "site.yml".to_owned(),
            tasks: vec![task.clone()],
            options: vars(&[("hosts", json!("all")), ("become", json!(true))]),
            ..Play::default()
        };
        ScanResult {
            playbooks: vec![Playbook {
                r#type: "playbook".to_owned(),
                name: "site".to_owned(),
                filepath: "site.yml".to_owned(),
                tasks: vec![task],
                plays: vec![play],
                ..Playbook::default()
            }],
            variables: vars(&[("pkg", json!("nginx"))]),
            ..ScanResult::default()
        }
    }

    #[test]
    fn test_inputs_from_scan_result() {
        let inputs = inputs_from_scan_result(&sample_scan(), None, None);
        let kinds: Vec<&str> = inputs.iter().map(|(kind, _)| kind.as_str()).collect();
        assert_eq!(kinds, vec!["task", "play", "role", "project"]);
        assert_eq!(inputs[0].1.len(), 1);
        assert_eq!(inputs[1].1.len(), 1);
        assert!(inputs[2].1.is_empty());
        assert_eq!(inputs[3].1.len(), 1);
    }

    #[test]
    fn test_task_input_to_json() {
        let inputs = inputs_from_scan_result(&sample_scan(), None, None);
        let task_input = &inputs[0].1[0];
        let serialized = task_input.to_json().expect("serialize");
        let parsed: Value = serde_json::from_str(&serialized).expect("json");

        // The focal task's YAML block is flattened at the top level, with
        // variables resolved.
        assert_eq!(parsed["name"], json!("Install nginx"));
        assert_eq!(parsed["package"]["name"], json!("nginx"));
        // The whole input rides along under the carrier key.
        assert_eq!(parsed[INPUT_CARRIER_KEY]["type"], json!("task"));
        assert_eq!(
            parsed[INPUT_CARRIER_KEY]["task"]["name"],
            json!("Install nginx")
        );
    }

    #[test]
    fn test_variable_layering_precedence() {
        let mut scan = sample_scan();
        _ = scan
            .variables
            .insert("layer".to_owned(), json!("scan"));
        scan.files.push(VarsFile {
            r#type: "file".to_owned(),
            filepath: "group_vars/all.yml".to_owned(),
            data: Some(json!({ "layer": "vars_file" })),
            ..VarsFile::default()
        });

        let runtime = RuntimeData {
            extra_vars: vars(&[("layer", json!("runtime"))]),
            ..RuntimeData::default()
        };
        let overrides = Variables {
            extra_vars: vars(&[("layer", json!("override"))]),
            ..Variables::default()
        };

        let inputs = inputs_from_scan_result(&scan, Some(&runtime), Some(&overrides));
        let PolicyInput::Project { context } = &inputs[3].1[0] else {
            panic!("expected a project input");
        };
        assert_eq!(context.variables["layer"], json!("override"));
    }

    #[test]
    fn test_play_input_to_json_uses_options() {
        let inputs = inputs_from_scan_result(&sample_scan(), None, None);
        let play_input = &inputs[1].1[0];
        let parsed: Value =
            serde_json::from_str(&play_input.to_json().expect("serialize")).expect("json");
        assert_eq!(parsed["hosts"], json!("all"));
        assert_eq!(parsed["become"], json!(true));
        assert_eq!(parsed[INPUT_CARRIER_KEY]["type"], json!("play"));
    }
}
