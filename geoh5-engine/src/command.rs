use std::collections::HashMap;

use geoh5_core::id::EntityId;
use tracing::debug;

use crate::session::Session;

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(&self, request: &CommandRequest, context: &mut CommandContext<'_>)
    -> CommandResponse;
}

pub struct CommandContext<'a> {
    pub session: &'a mut Session,
}

pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        bus.register(SummaryCommand);
        bus.register(RemoveCommand);
        bus.register(RenameCommand);
        bus.register(FinalizeCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        debug!(command = %request.name, args = ?request.args, "分发命令");
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            handler.execute(request, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", request.name))
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_id(request: &CommandRequest, index: usize) -> Result<EntityId, CommandResponse> {
    let raw = request
        .args
        .get(index)
        .ok_or_else(|| CommandResponse::err(format!("{} 缺少实体 ID 参数", request.name)))?;
    raw.parse()
        .map_err(|err| CommandResponse::err(format!("无效的实体 ID `{raw}`: {err}")))
}

struct SummaryCommand;

impl CommandHandler for SummaryCommand {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        CommandResponse::ok(context.session.summary())
    }
}

struct RemoveCommand;

impl CommandHandler for RemoveCommand {
    fn name(&self) -> &'static str {
        "remove"
    }

    fn execute(&self, request: &CommandRequest, context: &mut CommandContext<'_>) -> CommandResponse {
        let id = match parse_id(request, 0) {
            Ok(id) => id,
            Err(response) => return response,
        };
        match context.session.workspace_mut().remove_entity(id) {
            Ok(()) => CommandResponse::ok(format!("已删除实体 {id}")),
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

struct RenameCommand;

impl CommandHandler for RenameCommand {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn execute(&self, request: &CommandRequest, context: &mut CommandContext<'_>) -> CommandResponse {
        let id = match parse_id(request, 0) {
            Ok(id) => id,
            Err(response) => return response,
        };
        let Some(name) = request.args.get(1) else {
            return CommandResponse::err("rename 缺少新名称参数");
        };
        match context.session.workspace_mut().rename(id, name.clone()) {
            Ok(()) => CommandResponse::ok(format!("实体 {id} 已重命名为 `{name}`")),
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

struct FinalizeCommand;

impl CommandHandler for FinalizeCommand {
    fn name(&self) -> &'static str {
        "finalize"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        match context.session.finalize() {
            Ok(()) => CommandResponse::ok(format!(
                "工作区已写入 {}",
                context.session.path().display()
            )),
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}
