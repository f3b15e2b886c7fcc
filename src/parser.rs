use crate::ast::{
    AssignmentExpression, BinaryExpressionNode, BinaryOperator, ExpressionNode,
    FunctionCallExpressionNode, FunctionDeclarationNode, IdentifierNode, IfExpressionNode,
    ListCreationNode, LiteralInt32Node, ModuleRootNode, Parameter, ScopeNode, SourceCodeRef,
    TupleCreationNode,
};
use crate::datatype::Datatype;
use crate::error::ParseFailure;
use crate::peg::{errors_to_string, AnyValue, GrammarError, MatchInfo, PegParser, PegTokenizer};

/// The samal surface parser: the language grammar registered in the PEG
/// engine, with callbacks that assemble the AST while the match tree unwinds.
pub struct Parser {
    peg: PegParser,
}

fn to_ref(info: &MatchInfo, tokenizer: &PegTokenizer) -> SourceCodeRef {
    let text = tokenizer.slice(info.start, info.end);
    let leading = text.len() - text.trim_start().len();
    let trailing = text.len() - text.trim_end().len();
    let start = info.start + leading;
    let end = std::cmp::max(info.end - trailing, start);
    let position = tokenizer.position(start);
    SourceCodeRef {
        start,
        end,
        line: position.line,
        column: position.column,
    }
}

fn build_grammar() -> Result<PegParser, GrammarError> {
    let mut peg = PegParser::new();

    peg.add_rule("Start", "Declaration+")?;
    peg.set_callback(
        "Start",
        Box::new(|res, tok| {
            let declarations = res
                .subs
                .iter_mut()
                .map(|d| d.result.take::<FunctionDeclarationNode>())
                .collect();
            AnyValue::new(ModuleRootNode {
                source: to_ref(res, tok),
                name: String::new(),
                declarations,
            })
        }),
    )?;

    peg.add_rule("Declaration", "FunctionDeclaration")?;
    peg.set_callback("Declaration", Box::new(|res, _| res.result.move_out()))?;

    peg.add_rule(
        "FunctionDeclaration",
        "'fn' Identifier '(' ParameterList ')' '->' Datatype ScopeExpression",
    )?;
    peg.set_callback(
        "FunctionDeclaration",
        Box::new(|res, tok| {
            AnyValue::new(FunctionDeclarationNode {
                source: to_ref(res, tok),
                name: res[1].result.take::<IdentifierNode>(),
                parameters: res[3].result.take::<Vec<Parameter>>(),
                return_type: res[6].result.take::<Datatype>(),
                body: res[7].result.take::<ScopeNode>(),
            })
        }),
    )?;

    peg.add_rule("ParameterList", "ParameterListRec?")?;
    peg.set_callback(
        "ParameterList",
        Box::new(|res, _| {
            if res.subs.is_empty() {
                AnyValue::new(Vec::<Parameter>::new())
            } else {
                res[0].result.move_out()
            }
        }),
    )?;

    peg.add_rule(
        "ParameterListRec",
        "Identifier ':' Datatype (',' ParameterListRec)?",
    )?;
    peg.set_callback(
        "ParameterListRec",
        Box::new(|res, _| {
            let mut params = vec![Parameter {
                name: res[0].result.take::<IdentifierNode>(),
                datatype: res[2].result.take::<Datatype>(),
            }];
            if !res[3].subs.is_empty() {
                params.extend(res[3][0][1].result.take::<Vec<Parameter>>());
            }
            AnyValue::new(params)
        }),
    )?;

    peg.add_rule(
        "Identifier",
        r"[a-zA-Z]+ ~nws~(~nws~[\da-zA-Z])* (~nws~'.' ~nws~Identifier)?",
    )?;
    peg.set_callback(
        "Identifier",
        Box::new(|res, tok| {
            let first = tok.slice(res[0].start, res[1].end).trim().to_string();
            let mut name = vec![first];
            if !res[2].subs.is_empty() {
                name.extend(res[2][0][1].result.take::<IdentifierNode>().name);
            }
            AnyValue::new(IdentifierNode {
                source: to_ref(res, tok),
                name,
                resolved: None,
            })
        }),
    )?;

    peg.add_rule(
        "Datatype",
        "('fn' '(' DatatypeVector ')' '->' Datatype) | 'i32' | 'i64' | 'bool' \
         | ('[' Datatype ']') | Identifier | ('(' Datatype ')') | ('(' DatatypeVector ')')",
    )?;
    peg.set_callback(
        "Datatype",
        Box::new(|res, _| {
            let datatype = match res.choice.expect("Datatype rule is a choice") {
                0 => Datatype::function(
                    res[0][5].result.take::<Datatype>(),
                    res[0][2].result.take::<Vec<Datatype>>(),
                ),
                1 => Datatype::I32,
                2 => Datatype::I64,
                3 => Datatype::Bool,
                4 => Datatype::list(res[0][1].result.take::<Datatype>()),
                5 => Datatype::undetermined(res[0].result.take::<IdentifierNode>().joined_name()),
                6 => res[0][1].result.take::<Datatype>(),
                7 => Datatype::Tuple(res[0][1].result.take::<Vec<Datatype>>()),
                _ => unreachable!(),
            };
            AnyValue::new(datatype)
        }),
    )?;

    peg.add_rule("DatatypeVector", "DatatypeVectorRec?")?;
    peg.set_callback(
        "DatatypeVector",
        Box::new(|res, _| {
            if res.subs.is_empty() {
                AnyValue::new(Vec::<Datatype>::new())
            } else {
                res[0].result.move_out()
            }
        }),
    )?;

    peg.add_rule("DatatypeVectorRec", "Datatype (',' DatatypeVectorRec)?")?;
    peg.set_callback(
        "DatatypeVectorRec",
        Box::new(|res, _| {
            let mut types = vec![res[0].result.take::<Datatype>()];
            if !res[1].subs.is_empty() {
                types.extend(res[1][0][1].result.take::<Vec<Datatype>>());
            }
            AnyValue::new(types)
        }),
    )?;

    peg.add_rule("ScopeExpression", "'{' (Expression (~snn~'\n')?)* '}'")?;
    peg.set_callback(
        "ScopeExpression",
        Box::new(|res, tok| {
            let expressions = res[1]
                .subs
                .iter_mut()
                .map(|expr| expr[0].result.take::<ExpressionNode>())
                .collect();
            AnyValue::new(ScopeNode {
                source: to_ref(res, tok),
                expressions,
            })
        }),
    )?;

    peg.add_rule(
        "Expression",
        "(IfExpression | ScopeExpression | MathExpression) #Expected Expression#",
    )?;
    peg.set_callback(
        "Expression",
        Box::new(|res, _| {
            match res.choice.expect("Expression rule is a choice") {
                // A bare scope is an expression too.
                1 => AnyValue::new(ExpressionNode::Scope(res[0].result.take::<ScopeNode>())),
                _ => res[0].result.move_out(),
            }
        }),
    )?;

    peg.add_rule(
        "MathExpression",
        "AssignmentExpression #Expected mathematical expression#",
    )?;
    peg.set_callback("MathExpression", Box::new(|res, _| res.result.move_out()))?;

    peg.add_rule(
        "AssignmentExpression",
        "(Identifier '=' !'=')? LogicalCombinationExpression",
    )?;
    peg.set_callback(
        "AssignmentExpression",
        Box::new(|res, tok| {
            if res[0].subs.is_empty() {
                return res[1].result.move_out();
            }
            AnyValue::new(ExpressionNode::Assignment(Box::new(AssignmentExpression {
                source: to_ref(res, tok),
                left: res[0][0][0].result.take::<IdentifierNode>(),
                right: res[1].result.take::<ExpressionNode>(),
            })))
        }),
    )?;

    let binary_rules: &[(&str, &str, &[BinaryOperator])] = &[
        (
            "LogicalCombinationExpression",
            "LogicalEqualExpression (('&&' | '||') LogicalCombinationExpression)?",
            &[BinaryOperator::LogicalAnd, BinaryOperator::LogicalOr],
        ),
        (
            "LogicalEqualExpression",
            "LogicalComparisonExpression (('==' | '!=') LogicalEqualExpression)?",
            &[
                BinaryOperator::LogicalEquals,
                BinaryOperator::LogicalNotEquals,
            ],
        ),
        (
            "LogicalComparisonExpression",
            "LineExpression (('<=' | '<' | '>=' | '>') LogicalComparisonExpression)?",
            &[
                BinaryOperator::ComparisonLessEqualThan,
                BinaryOperator::ComparisonLessThan,
                BinaryOperator::ComparisonMoreEqualThan,
                BinaryOperator::ComparisonMoreThan,
            ],
        ),
        (
            "LineExpression",
            "DotExpression (('+' | '-') LineExpression)?",
            &[BinaryOperator::Plus, BinaryOperator::Minus],
        ),
        (
            "DotExpression",
            "PostfixExpression (('*' | '/') DotExpression)?",
            &[BinaryOperator::Multiply, BinaryOperator::Divide],
        ),
    ];
    for (name, expression, operators) in binary_rules {
        let operators: Vec<BinaryOperator> = operators.to_vec();
        peg.add_rule(name, expression)?;
        peg.set_callback(
            name,
            Box::new(move |res, tok| {
                if res[1].subs.is_empty() {
                    return res[0].result.move_out();
                }
                let operator =
                    operators[res[1][0][0].choice.expect("operator group is a choice")];
                AnyValue::new(ExpressionNode::Binary(Box::new(BinaryExpressionNode {
                    source: to_ref(res, tok),
                    left: res[0].result.take::<ExpressionNode>(),
                    operator,
                    right: res[1][0][1].result.take::<ExpressionNode>(),
                })))
            }),
        )?;
    }

    // Chained calls like b(5)(3) are handled here because the engine has no
    // left recursion.
    peg.add_rule(
        "PostfixExpression",
        "LiteralExpression ~snn~(~snn~'(' ExpressionListWithoutDatatype ')')*",
    )?;
    peg.set_callback(
        "PostfixExpression",
        Box::new(|res, tok| {
            let source = to_ref(res, tok);
            let mut ret = res[0].result.take::<ExpressionNode>();
            for group in res[1].subs.iter_mut() {
                ret = ExpressionNode::FunctionCall(Box::new(FunctionCallExpressionNode {
                    source,
                    name: ret,
                    params: group[1].result.take::<Vec<ExpressionNode>>(),
                }));
            }
            AnyValue::new(ret)
        }),
    )?;

    peg.add_rule(
        "LiteralExpression",
        r"[\d]+ | ('[' ':' Datatype ']') | ('[' ExpressionListWithoutDatatype ']') | Identifier | ('(' MathExpression ')') | ('(' ExpressionListWithoutDatatype ')') | ScopeExpression",
    )?;
    peg.set_callback(
        "LiteralExpression",
        Box::new(|res, tok| {
            let source = to_ref(res, tok);
            let node = match res.choice.expect("LiteralExpression rule is a choice") {
                0 => ExpressionNode::LiteralInt32(LiteralInt32Node {
                    source,
                    value: res.text(tok).parse().unwrap_or(i32::MAX),
                }),
                1 => ExpressionNode::ListCreation(ListCreationNode {
                    source,
                    base_type: Some(res[0][2].result.take::<Datatype>()),
                    params: Vec::new(),
                }),
                2 => ExpressionNode::ListCreation(ListCreationNode {
                    source,
                    base_type: None,
                    params: res[0][1].result.take::<Vec<ExpressionNode>>(),
                }),
                3 => ExpressionNode::Identifier(res[0].result.take::<IdentifierNode>()),
                4 => return res[0][1].result.move_out(),
                5 => ExpressionNode::TupleCreation(TupleCreationNode {
                    source,
                    params: res[0][1].result.take::<Vec<ExpressionNode>>(),
                }),
                6 => ExpressionNode::Scope(res[0].result.take::<ScopeNode>()),
                _ => unreachable!(),
            };
            AnyValue::new(node)
        }),
    )?;

    peg.add_rule(
        "IfExpression",
        "'if' Expression ScopeExpression #Expected Expression# \
         ('else' 'if' Expression ScopeExpression)* ('else' ScopeExpression)?",
    )?;
    peg.set_callback(
        "IfExpression",
        Box::new(|res, tok| {
            let mut children = vec![(
                res[1].result.take::<ExpressionNode>(),
                res[2].result.take::<ScopeNode>(),
            )];
            for else_if in res[3].subs.iter_mut() {
                children.push((
                    else_if[2].result.take::<ExpressionNode>(),
                    else_if[3].result.take::<ScopeNode>(),
                ));
            }
            let else_body = if res[4].subs.is_empty() {
                None
            } else {
                Some(res[4][0][1].result.take::<ScopeNode>())
            };
            AnyValue::new(ExpressionNode::If(Box::new(IfExpressionNode {
                source: to_ref(res, tok),
                children,
                else_body,
            })))
        }),
    )?;

    peg.add_rule(
        "ExpressionListWithoutDatatype",
        "ExpressionListWithoutDatatypeRec?",
    )?;
    peg.set_callback(
        "ExpressionListWithoutDatatype",
        Box::new(|res, _| {
            if res.subs.is_empty() {
                AnyValue::new(Vec::<ExpressionNode>::new())
            } else {
                res[0].result.move_out()
            }
        }),
    )?;

    peg.add_rule(
        "ExpressionListWithoutDatatypeRec",
        "Expression (',' ExpressionListWithoutDatatypeRec)?",
    )?;
    peg.set_callback(
        "ExpressionListWithoutDatatypeRec",
        Box::new(|res, _| {
            let mut params = vec![res[0].result.take::<ExpressionNode>()];
            if !res[1].subs.is_empty() {
                params.extend(res[1][0][1].result.take::<Vec<ExpressionNode>>());
            }
            AnyValue::new(params)
        }),
    )?;

    peg.validate()?;
    Ok(peg)
}

impl Parser {
    pub fn new() -> Self {
        let peg = build_grammar()
            .unwrap_or_else(|err| panic!("The built-in samal grammar failed to compile: {}", err));
        Self { peg }
    }

    /// Parse one module. On failure the rendered error tree is returned.
    pub fn parse(&self, module_name: &str, code: &str) -> Result<ModuleRootNode, ParseFailure> {
        let (result, tokenizer) = self.peg.parse("Start", code.to_string());
        match result {
            Ok(mut info) => {
                let mut module = info.result.take::<ModuleRootNode>();
                module.name = module_name.to_string();
                Ok(module)
            }
            Err(fail) => Err(ParseFailure {
                eof: fail.eof,
                rendered: errors_to_string(&fail, &tokenizer),
            }),
        }
    }

    /// Parse a single expression, mostly useful for probing the grammar's
    /// error reporting.
    pub fn parse_expression(&self, code: &str) -> Result<crate::ast::ExpressionNode, ParseFailure> {
        let (result, tokenizer) = self.peg.parse("Expression", code.to_string());
        match result {
            Ok(mut info) => Ok(info.result.take::<ExpressionNode>()),
            Err(fail) => Err(ParseFailure {
                eof: fail.eof,
                rendered: errors_to_string(&fail, &tokenizer),
            }),
        }
    }

    /// Parse a datatype snippet such as `"fn(i32) -> [i32]"`.
    pub fn parse_datatype(&self, type_string: &str) -> Result<Datatype, ParseFailure> {
        let (result, tokenizer) = self.peg.parse("Datatype", type_string.to_string());
        match result {
            Ok(mut info) => Ok(info.result.take::<Datatype>()),
            Err(fail) => Err(ParseFailure {
                eof: fail.eof,
                rendered: errors_to_string(&fail, &tokenizer),
            }),
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
