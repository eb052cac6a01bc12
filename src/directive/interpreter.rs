//! Executes template programs against a scope and a render session

use indexmap::IndexMap;

use crate::directive::program::{Node, Program};
use crate::error::ViewError;
use crate::expr::{AssignOp, BinaryOp, Expr, ForHeader, ForeachHeader, Scope, Stmt};
use crate::session::RenderSession;
use crate::value::{escape_html, Value};

/// How control leaves a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Normal,
    /// Unwind this many loop levels, then stop the innermost
    Break(usize),
    /// Unwind this many loop levels, then continue the innermost
    Continue(usize),
    /// `@dd` fired; stop evaluating altogether
    Halt,
}

/// Runs a program, writing output and recording pushes and sections in the
/// session
pub struct Interpreter<'s> {
    session: &'s mut RenderSession,
    scope: Scope,
    loop_depth: usize,
    allow_extends: bool,
}

impl<'s> Interpreter<'s> {
    pub fn new(session: &'s mut RenderSession, scope: Scope) -> Self {
        Self {
            session,
            scope,
            loop_depth: 0,
            allow_extends: true,
        }
    }

    /// Reject `@extends`, as in included views
    pub fn without_extends(mut self) -> Self {
        self.allow_extends = false;
        self
    }

    /// Run a program and return its output
    pub fn run(&mut self, program: &Program) -> Result<String, ViewError> {
        let mut out = String::new();
        match self.block(&program.nodes, &mut out)? {
            Flow::Normal | Flow::Halt => Ok(out),
            Flow::Break(_) => Err(ViewError::evaluation("@break outside of a loop")),
            Flow::Continue(_) => Err(ViewError::evaluation("@continue outside of a loop")),
        }
    }

    /// Variables as left by the program
    pub fn into_scope(self) -> Scope {
        self.scope
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ViewError> {
        self.session.evaluate(expr, &self.scope)
    }

    fn block(&mut self, nodes: &[Node], out: &mut String) -> Result<Flow, ViewError> {
        for node in nodes {
            let flow = self.node(node, out)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    /// Run `nodes` into a separate buffer; on `@dd` the captured text is
    /// kept in the enclosing output
    fn capture(&mut self, nodes: &[Node], out: &mut String) -> Result<(String, Flow), ViewError> {
        let mut buffer = String::new();
        let flow = self.block(nodes, &mut buffer)?;
        if flow == Flow::Halt {
            out.push_str(&buffer);
        }
        Ok((buffer, flow))
    }

    fn node(&mut self, node: &Node, out: &mut String) -> Result<Flow, ViewError> {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Echo { expr, escape } => {
                let value = self.eval(expr)?.to_string();
                if *escape {
                    out.push_str(&escape_html(&value));
                } else {
                    out.push_str(&value);
                }
            }
            Node::Json(expr) => {
                let value = self.eval(expr)?;
                out.push_str(&value.to_json_html());
            }
            Node::Dump(expr) => {
                let value = self.eval(expr)?;
                out.push_str(&dump(&value)?);
            }
            Node::Dd(expr) => {
                let value = self.eval(expr)?;
                out.push_str(&dump(&value)?);
                self.session.halt();
                return Ok(Flow::Halt);
            }
            Node::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.is_truthy() {
                        return self.block(body, out);
                    }
                }
                if let Some(body) = otherwise {
                    return self.block(body, out);
                }
            }
            Node::Foreach {
                header,
                body,
                empty,
            } => return self.foreach(header, body, empty.as_deref(), out),
            Node::For { header, body } => return self.for_loop(header, body, out),
            Node::While { condition, body } => return self.while_loop(condition, body, out),
            Node::Break(levels) => return Ok(Flow::Break(*levels)),
            Node::Continue(levels) => return Ok(Flow::Continue(*levels)),
            Node::Php(stmts) => {
                for stmt in stmts {
                    self.stmt(stmt)?;
                }
            }
            Node::Push {
                stack,
                body,
                prepend,
            } => {
                let name = self.eval(stack)?.to_string();
                let (content, flow) = self.capture(body, out)?;
                if *prepend {
                    self.session.stacks_mut().prepend(name, content);
                } else {
                    self.session.stacks_mut().push(name, content);
                }
                return Ok(flow);
            }
            Node::Section { name, body } => {
                let name = self.eval(name)?.to_string();
                let (content, flow) = self.capture(body, out)?;
                self.session.sections_mut().put(name, content);
                return Ok(flow);
            }
            Node::SectionValue { name, value } => {
                let name = self.eval(name)?.to_string();
                let value = self.eval(value)?.to_string();
                self.session.sections_mut().put(name, escape_html(&value));
            }
            Node::Yield { name, default } => {
                let name = self.eval(name)?.to_string();
                match self.session.sections().get(&name) {
                    Some(content) => out.push_str(content),
                    None => {
                        if let Some(default) = default {
                            let value = self.eval(default)?.to_string();
                            out.push_str(&escape_html(&value));
                        }
                    }
                }
            }
            Node::Extends(layout) => {
                if !self.allow_extends {
                    return Err(ViewError::evaluation(
                        "@extends is not allowed in an included view",
                    ));
                }
                let layout = self.eval(layout)?.to_string();
                self.session.set_extends(layout);
            }
            Node::Stack(name) => {
                let name = self.eval(name)?.to_string();
                out.push_str(&self.session.placeholder(&name));
            }
            Node::Fragment(index) => {
                let fragment = self.session.fragment(*index).ok_or_else(|| {
                    ViewError::evaluation(format!("unknown include fragment {}", index))
                })?;
                out.push_str(fragment);
            }
        }
        Ok(Flow::Normal)
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), ViewError> {
        match stmt {
            Stmt::Assign { name, op, value } => {
                let expr = match op {
                    AssignOp::Set => value.clone(),
                    AssignOp::Add => compound(name, BinaryOp::Add, value.clone()),
                    AssignOp::Sub => compound(name, BinaryOp::Sub, value.clone()),
                    AssignOp::Concat => compound(name, BinaryOp::Concat, value.clone()),
                };
                let result = self.eval(&expr)?;
                self.scope.set(name.clone(), result);
            }
            Stmt::Step { name, delta } => {
                let expr = compound(name, BinaryOp::Add, Expr::Literal(Value::Int(*delta)));
                let result = self.eval(&expr)?;
                self.scope.set(name.clone(), result);
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
        }
        Ok(())
    }

    /// Apply the flow of one loop iteration; `Some` leaves the loop with
    /// that flow
    fn after_iteration(flow: Flow) -> Option<Flow> {
        match flow {
            Flow::Normal | Flow::Continue(1) => None,
            Flow::Break(1) => Some(Flow::Normal),
            Flow::Break(n) => Some(Flow::Break(n - 1)),
            Flow::Continue(n) => Some(Flow::Continue(n - 1)),
            Flow::Halt => Some(Flow::Halt),
        }
    }

    fn foreach(
        &mut self,
        header: &ForeachHeader,
        body: &[Node],
        empty: Option<&[Node]>,
        out: &mut String,
    ) -> Result<Flow, ViewError> {
        let entries: Vec<(Value, Value)> = match self.eval(&header.iterable)? {
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::from(i), v))
                .collect(),
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| (Value::String(k), v))
                .collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(ViewError::evaluation(format!(
                    "cannot iterate over {}",
                    other.type_name()
                )))
            }
        };

        if entries.is_empty() {
            return match empty {
                Some(nodes) => self.block(nodes, out),
                None => Ok(Flow::Normal),
            };
        }

        let parent = self.scope.get("loop").cloned();
        self.loop_depth += 1;
        let count = entries.len();
        let mut result = Ok(Flow::Normal);

        for (index, (key, value)) in entries.into_iter().enumerate() {
            if let Err(err) = self.session.tick() {
                result = Err(err);
                break;
            }
            self.scope.set("loop", loop_info(index, count, self.loop_depth, &parent));
            if let Some(key_name) = &header.key {
                self.scope.set(key_name.clone(), key);
            }
            self.scope.set(header.value.clone(), value);

            match self.block(body, out) {
                Ok(flow) => {
                    if let Some(exit) = Self::after_iteration(flow) {
                        result = Ok(exit);
                        break;
                    }
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        self.loop_depth -= 1;
        self.scope.restore("loop", parent);
        result
    }

    fn for_loop(&mut self, header: &ForHeader, body: &[Node], out: &mut String) -> Result<Flow, ViewError> {
        for stmt in &header.init {
            self.stmt(stmt)?;
        }
        self.loop_depth += 1;
        let result = self.for_iterations(header, body, out);
        self.loop_depth -= 1;
        result
    }

    fn for_iterations(&mut self, header: &ForHeader, body: &[Node], out: &mut String) -> Result<Flow, ViewError> {
        loop {
            self.session.tick()?;
            if let Some(condition) = &header.condition {
                if !self.eval(condition)?.is_truthy() {
                    return Ok(Flow::Normal);
                }
            }
            let flow = self.block(body, out)?;
            if let Some(exit) = Self::after_iteration(flow) {
                return Ok(exit);
            }
            for stmt in &header.step {
                self.stmt(stmt)?;
            }
        }
    }

    fn while_loop(&mut self, condition: &Expr, body: &[Node], out: &mut String) -> Result<Flow, ViewError> {
        self.loop_depth += 1;
        let result = loop {
            if let Err(err) = self.session.tick() {
                break Err(err);
            }
            match self.eval(condition) {
                Ok(value) if !value.is_truthy() => break Ok(Flow::Normal),
                Ok(_) => {}
                Err(err) => break Err(err),
            }
            match self.block(body, out) {
                Ok(flow) => {
                    if let Some(exit) = Self::after_iteration(flow) {
                        break Ok(exit);
                    }
                }
                Err(err) => break Err(err),
            }
        };
        self.loop_depth -= 1;
        result
    }
}

/// `$name <op> value`
fn compound(name: &str, op: BinaryOp, value: Expr) -> Expr {
    Expr::binary(Expr::Variable(name.to_string()), op, value)
}

/// The `$loop` variable for one iteration
fn loop_info(index: usize, count: usize, depth: usize, parent: &Option<Value>) -> Value {
    let mut info = IndexMap::new();
    info.insert("index".to_string(), Value::from(index));
    info.insert("iteration".to_string(), Value::from(index + 1));
    info.insert("count".to_string(), Value::from(count));
    info.insert("remaining".to_string(), Value::from(count - index - 1));
    info.insert("first".to_string(), Value::Bool(index == 0));
    info.insert("last".to_string(), Value::Bool(index + 1 == count));
    info.insert("depth".to_string(), Value::from(depth));
    info.insert("parent".to_string(), parent.clone().unwrap_or(Value::Null));
    Value::Map(info)
}

/// HTML for `@dump` and `@dd`
fn dump(value: &Value) -> Result<String, ViewError> {
    let json = serde_json::to_string_pretty(&value.to_json())
        .map_err(|e| ViewError::evaluation(format!("cannot dump value: {}", e)))?;
    log::debug!("@dump: {}", json);
    Ok(format!("<pre class=\"dump\">{}</pre>", escape_html(&json)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RenderContext;
    use crate::directive::{parse_program, DirectiveTranslator};
    use crate::provider::StaticAuth;
    use std::sync::Arc;

    fn run_with(template: &str, ctx: &RenderContext, session: &mut RenderSession) -> Result<String, ViewError> {
        let translated = DirectiveTranslator::new().translate(template);
        let program = parse_program(&translated)?;
        Interpreter::new(session, Scope::from(ctx)).run(&program)
    }

    fn run(template: &str, ctx: &RenderContext) -> Result<String, ViewError> {
        let mut session = RenderSession::new(Arc::new(StaticAuth::guest()), 100_000);
        run_with(template, ctx, &mut session)
    }

    #[test]
    fn test_if_else_scenario() {
        let template = "@if($count > 0) {{ $count }} items @else None @endif";
        let three = RenderContext::new().with("count", 3);
        let zero = RenderContext::new().with("count", 0);
        assert_eq!(run(template, &three).unwrap(), " 3 items ");
        assert_eq!(run(template, &zero).unwrap(), " None ");
    }

    #[test]
    fn test_escaped_and_raw_output() {
        let ctx = RenderContext::new().with("s", r#"<a href="x">&</a>"#);
        assert_eq!(
            run("{{ $s }}|{!! $s !!}", &ctx).unwrap(),
            r#"&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;|<a href="x">&</a>"#
        );
    }

    #[test]
    fn test_foreach_with_loop_variable() {
        let ctx = RenderContext::new().with("xs", vec!["a", "b", "c"]);
        let out = run(
            "@foreach($xs as $i => $x){{ $loop->iteration }}{{ $x }}@if($loop->last).@else,@endif@endforeach",
            &ctx,
        )
        .unwrap();
        assert_eq!(out, "1a,2b,3c.");
    }

    #[test]
    fn test_nested_loop_parent() {
        let ctx = RenderContext::new().with("rows", vec![vec![1, 2], vec![3]]);
        let out = run(
            "@foreach($rows as $row)@foreach($row as $cell){{ $loop->parent->index }}{{ $loop->depth }};@endforeach@endforeach",
            &ctx,
        )
        .unwrap();
        assert_eq!(out, "02;02;12;");
    }

    #[test]
    fn test_forelse_empty_branch() {
        let ctx = RenderContext::new().with("xs", Vec::<i64>::new());
        assert_eq!(
            run("@forelse($xs as $x){{ $x }}@empty none @endforelse", &ctx).unwrap(),
            "none "
        );
    }

    #[test]
    fn test_break_and_continue_levels() {
        let ctx = RenderContext::new().with("xs", vec![1, 2, 3, 4]);
        assert_eq!(
            run("@foreach($xs as $x)@if($x == 2)@continue @endif@if($x == 4)@break @endif{{ $x }}@endforeach", &ctx).unwrap(),
            "13"
        );
        let out = run(
            "@foreach($xs as $a)@foreach($xs as $b)@if($b == 2)@continue(2)@endif{{ $a }}{{ $b }} @endforeach@endforeach",
            &ctx,
        )
        .unwrap();
        assert_eq!(out, "11 21 31 41 ");
    }

    #[test]
    fn test_for_and_while_with_php() {
        let ctx = RenderContext::new();
        assert_eq!(run("@for($i = 0; $i < 3; $i++){{ $i }}@endfor", &ctx).unwrap(), "012");
        assert_eq!(
            run("@php $n = 3; $s = ''; @endphp@while($n > 0)@php($s .= $n; $n--)@endwhile{{ $s }}", &ctx).unwrap(),
            "321"
        );
    }

    #[test]
    fn test_infinite_loop_hits_budget() {
        let mut session = RenderSession::new(Arc::new(StaticAuth::guest()), 500);
        let err = run_with("@while(true) x @endwhile", &RenderContext::new(), &mut session).unwrap_err();
        assert!(err.to_string().contains("budget"), "{err}");
    }

    #[test]
    fn test_push_records_exact_content() {
        let mut session = RenderSession::new(Arc::new(StaticAuth::guest()), 10_000);
        let out = run_with(
            "a @push('s')\n  <script>1</script>\n@endpush b @prepend('s')<meta>@endprepend",
            &RenderContext::new(),
            &mut session,
        )
        .unwrap();
        assert_eq!(out, "a  b ");
        assert_eq!(
            session.stacks().yield_stack("s"),
            "<meta>\n\n  <script>1</script>\n"
        );
    }

    #[test]
    fn test_sections_and_yield() {
        let mut session = RenderSession::new(Arc::new(StaticAuth::guest()), 10_000);
        let out = run_with(
            r#"@section("title", "<Home>")@section("body")<p>hi</p>@endsection[@yield("title")][@yield("body")][@yield("none", "d")]"#,
            &RenderContext::new(),
            &mut session,
        )
        .unwrap();
        assert_eq!(out, "[&lt;Home&gt;][<p>hi</p>][d]");
    }

    #[test]
    fn test_json_and_dump() {
        let ctx = RenderContext::new().with("v", "</script>");
        assert_eq!(run("@json($v)", &ctx).unwrap(), r#""\u003C/script\u003E""#);
        assert_eq!(
            run("@dump($v)", &ctx).unwrap(),
            "<pre class=\"dump\">&quot;&lt;/script&gt;&quot;</pre>"
        );
    }

    #[test]
    fn test_dd_halts_with_output_so_far() {
        let ctx = RenderContext::new().with("v", 1);
        let mut session = RenderSession::new(Arc::new(StaticAuth::guest()), 10_000);
        let out = run_with("before @dd($v) after", &ctx, &mut session).unwrap();
        assert_eq!(out, "before <pre class=\"dump\">1</pre>");
        assert!(session.is_halted());
    }

    #[test]
    fn test_auth_and_csrf() {
        let mut session = RenderSession::new(Arc::new(StaticAuth::authenticated().with_token("t0k")), 10_000);
        let out = run_with("@auth in @endauth@guest out @endguest@csrf", &RenderContext::new(), &mut session).unwrap();
        assert_eq!(out, r#" in <input type="hidden" name="_token" value="t0k">"#);
    }

    #[test]
    fn test_undefined_variable_fails() {
        let err = run("{{ $nope }}", &RenderContext::new()).unwrap_err();
        assert!(matches!(err, ViewError::TemplateEvaluationError { ref message } if message.contains("$nope")));
    }

    #[test]
    fn test_break_outside_loop() {
        let err = run("@break", &RenderContext::new()).unwrap_err();
        assert!(err.to_string().contains("outside of a loop"));
    }

    #[test]
    fn test_variables_persist_after_loops() {
        let ctx = RenderContext::new().with("xs", vec![1, 2]);
        assert_eq!(
            run("@foreach($xs as $x)@php($last = $x)@endforeach{{ $last }}{{ isset($loop) ? 'y' : 'n' }}", &ctx).unwrap(),
            "2n"
        );
    }
}
