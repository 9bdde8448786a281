//! Programmatic construction of translation units
//!
//! Parsing is outside this crate, so hosts (and this crate's own tests)
//! assemble [`TranslationUnit`]s through these builders. Function-scoped
//! ids (variables, expressions, blocks) are minted per function; globals
//! live in a disjoint id range so a variable reference always resolves
//! unambiguously.

use crate::ast::expr::{BinOp, Expr, ExprKind, MemberInit, Stmt};
use crate::ast::func::{
    FunctionDecl, FunctionKind, MethodInfo, Param, TranslationUnit, VarDecl,
};
use crate::ast::ids::{
    BlockId, ExprId, FieldId, FuncId, IdGenerator, RecordId, TypeId, VarId,
};
use crate::ast::types::{FieldDecl, RecordDecl};
use crate::ast::SourceLocation;
use crate::cfg::{BasicBlock, ControlFlowGraph, Terminator};

/// Globals are minted from a disjoint id range (see module docs)
const GLOBAL_VAR_BASE: u32 = 1 << 20;

/// Builder for one translation unit
pub struct TranslationUnitBuilder {
    tu: TranslationUnit,
    func_ids: IdGenerator<FuncId>,
    record_ids: IdGenerator<RecordId>,
    field_ids: IdGenerator<FieldId>,
    global_ids: IdGenerator<VarId>,
}

impl TranslationUnitBuilder {
    pub fn new() -> Self {
        Self {
            tu: TranslationUnit::new(),
            func_ids: IdGenerator::new(),
            record_ids: IdGenerator::new(),
            field_ids: IdGenerator::new(),
            global_ids: IdGenerator::starting_at(GLOBAL_VAR_BASE),
        }
    }

    // Types.

    pub fn void_type(&mut self) -> TypeId {
        self.tu.types.void()
    }

    pub fn int_type(&mut self) -> TypeId {
        self.tu.types.scalar()
    }

    pub fn ptr(&mut self, pointee: TypeId) -> TypeId {
        self.tu.types.pointer_to(pointee)
    }

    pub fn reference(&mut self, referent: TypeId) -> TypeId {
        self.tu.types.reference_to(referent)
    }

    pub fn record_type(&mut self, record: RecordId) -> TypeId {
        let ty = self.tu.types.record_type(record);
        self.tu.record_types.insert(record, ty);
        ty
    }

    /// Register a record; returns its id and type
    pub fn add_record(&mut self, record: RecordSketch) -> (RecordId, TypeId) {
        let id = self.record_ids.mint();
        let mut decl = RecordDecl::new(id, record.name);
        decl.lifetime_params = record.lifetime_params;
        decl.bases = record.bases;
        for field in record.fields {
            decl.fields.push(FieldDecl {
                id: self.field_ids.mint(),
                name: field.0,
                ty: field.1,
                pointee_param: field.2,
            });
        }
        self.tu.types.add_record(decl);
        let ty = self.record_type(id);
        (id, ty)
    }

    pub fn field_id(&self, record: RecordId, name: &str) -> Option<FieldId> {
        self.tu
            .types
            .record(record)
            .fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.id)
    }

    /// A translation-unit global (or lowered function-scope static)
    pub fn global(&mut self, name: impl Into<String>, ty: TypeId) -> VarId {
        let id = self.global_ids.mint();
        self.tu.globals.insert(
            id,
            VarDecl {
                id,
                name: name.into(),
                ty,
                loc: SourceLocation::unknown(),
            },
        );
        id
    }

    /// Reserve a function id before its builder exists (forward calls)
    pub fn next_func_id(&mut self) -> FuncId {
        self.func_ids.mint()
    }

    /// Register a finished function and list it as a definition
    pub fn add_function(&mut self, decl: FunctionDecl) {
        let id = decl.id;
        let defined = decl.has_definition();
        self.tu.functions.insert(id, decl);
        if defined {
            self.tu.definition_order.push(id);
        }
    }

    /// Re-list a definition (frontends may report definitions twice)
    pub fn repeat_definition(&mut self, func: FuncId) {
        self.tu.definition_order.push(func);
    }

    pub fn finish(self) -> TranslationUnit {
        self.tu
    }
}

impl Default for TranslationUnitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain-data description of a record for [`TranslationUnitBuilder::add_record`]
pub struct RecordSketch {
    pub name: String,
    pub lifetime_params: Vec<String>,
    pub bases: Vec<RecordId>,
    /// `(name, type, bound lifetime parameter)`
    pub fields: Vec<(String, TypeId, Option<String>)>,
}

impl RecordSketch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifetime_params: Vec::new(),
            bases: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn lifetime_param(mut self, name: impl Into<String>) -> Self {
        self.lifetime_params.push(name.into());
        self
    }

    pub fn base(mut self, base: RecordId) -> Self {
        self.bases.push(base);
        self
    }

    pub fn field(mut self, name: impl Into<String>, ty: TypeId) -> Self {
        self.fields.push((name.into(), ty, None));
        self
    }

    pub fn field_bound(
        mut self,
        name: impl Into<String>,
        ty: TypeId,
        param: impl Into<String>,
    ) -> Self {
        self.fields.push((name.into(), ty, Some(param.into())));
        self
    }
}

/// Builder for one function: declaration, locals, and body CFG
pub struct FunctionBuilder {
    id: FuncId,
    canonical: FuncId,
    name: String,
    params: Vec<Param>,
    locals: crate::ast::ids::collections::IdMap<VarId, VarDecl>,
    return_ty: TypeId,
    kind: FunctionKind,
    is_defaulted: bool,
    is_builtin: bool,
    declaration_only: bool,
    template_key: Option<String>,
    cfg: ControlFlowGraph,
    entry: BlockId,
    var_ids: IdGenerator<VarId>,
    expr_ids: IdGenerator<ExprId>,
    block_ids: IdGenerator<BlockId>,
}

impl FunctionBuilder {
    pub fn new(id: FuncId, name: impl Into<String>, return_ty: TypeId) -> Self {
        let block_ids: IdGenerator<BlockId> = IdGenerator::new();
        let entry = block_ids.mint();
        let exit = block_ids.mint();
        Self {
            id,
            canonical: id,
            name: name.into(),
            params: Vec::new(),
            locals: Default::default(),
            return_ty,
            kind: FunctionKind::Free,
            is_defaulted: false,
            is_builtin: false,
            declaration_only: false,
            template_key: None,
            cfg: ControlFlowGraph::new(entry, exit, SourceLocation::unknown()),
            entry,
            var_ids: IdGenerator::new(),
            expr_ids: IdGenerator::new(),
            block_ids,
        }
    }

    // Declaration shape.

    pub fn param(&mut self, name: impl Into<String>, ty: TypeId) -> VarId {
        let var = self.var_ids.mint();
        self.params.push(Param {
            var,
            name: name.into(),
            ty,
            loc: SourceLocation::unknown(),
        });
        var
    }

    pub fn local(&mut self, name: impl Into<String>, ty: TypeId) -> VarId {
        let var = self.var_ids.mint();
        self.locals.insert(
            var,
            VarDecl {
                id: var,
                name: name.into(),
                ty,
                loc: SourceLocation::unknown(),
            },
        );
        var
    }

    pub fn method(&mut self, record: RecordId) -> &mut Self {
        self.kind = FunctionKind::Method(MethodInfo {
            record,
            is_virtual: false,
            is_pure_virtual: false,
            is_static: false,
            overridden: Vec::new(),
        });
        self
    }

    pub fn virtual_method(&mut self, record: RecordId, overridden: Vec<FuncId>) -> &mut Self {
        self.kind = FunctionKind::Method(MethodInfo {
            record,
            is_virtual: true,
            is_pure_virtual: false,
            is_static: false,
            overridden,
        });
        self
    }

    pub fn pure_virtual_method(&mut self, record: RecordId) -> &mut Self {
        self.kind = FunctionKind::Method(MethodInfo {
            record,
            is_virtual: true,
            is_pure_virtual: true,
            is_static: false,
            overridden: Vec::new(),
        });
        self.declaration_only = true;
        self
    }

    pub fn constructor(&mut self, record: RecordId) -> &mut Self {
        self.kind = FunctionKind::Constructor {
            record,
            inits: Vec::new(),
        };
        self
    }

    pub fn member_init(&mut self, field: FieldId, value: Expr) -> &mut Self {
        if let FunctionKind::Constructor { inits, .. } = &mut self.kind {
            inits.push(MemberInit { field, value });
        }
        self
    }

    pub fn defaulted(&mut self) -> &mut Self {
        self.is_defaulted = true;
        self.declaration_only = true;
        self
    }

    pub fn builtin(&mut self) -> &mut Self {
        self.is_builtin = true;
        self.declaration_only = true;
        self
    }

    pub fn declaration_only(&mut self) -> &mut Self {
        self.declaration_only = true;
        self
    }

    pub fn template_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.template_key = Some(key.into());
        self
    }

    // Expressions.

    fn expr(&mut self, ty: TypeId, kind: ExprKind) -> Expr {
        Expr {
            id: self.expr_ids.mint(),
            ty,
            loc: SourceLocation::unknown(),
            kind,
        }
    }

    pub fn var(&mut self, var: VarId, ty: TypeId) -> Expr {
        self.expr(ty, ExprKind::VarRef(var))
    }

    pub fn this_expr(&mut self, ty: TypeId) -> Expr {
        self.expr(ty, ExprKind::This)
    }

    pub fn int(&mut self, value: i64, ty: TypeId) -> Expr {
        self.expr(ty, ExprKind::IntLiteral(value))
    }

    pub fn null(&mut self, ty: TypeId) -> Expr {
        self.expr(ty, ExprKind::NullPtr)
    }

    pub fn addr(&mut self, of: Expr, ty: TypeId) -> Expr {
        self.expr(ty, ExprKind::AddressOf(Box::new(of)))
    }

    pub fn deref(&mut self, pointer: Expr, ty: TypeId) -> Expr {
        self.expr(ty, ExprKind::Deref(Box::new(pointer)))
    }

    pub fn member(&mut self, base: Expr, field: FieldId, ty: TypeId) -> Expr {
        self.expr(
            ty,
            ExprKind::Member {
                base: Box::new(base),
                field,
            },
        )
    }

    pub fn base_of(&mut self, base: Expr, record: RecordId, ty: TypeId) -> Expr {
        self.expr(
            ty,
            ExprKind::BaseOf {
                base: Box::new(base),
                record,
            },
        )
    }

    pub fn ptr_add(&mut self, base: Expr, offset: Expr) -> Expr {
        let ty = base.ty;
        self.expr(
            ty,
            ExprKind::PtrOffset {
                base: Box::new(base),
                offset: Box::new(offset),
            },
        )
    }

    pub fn binary(&mut self, op: BinOp, lhs: Expr, rhs: Expr, ty: TypeId) -> Expr {
        self.expr(
            ty,
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }

    pub fn call(&mut self, callee: FuncId, args: Vec<Expr>, ty: TypeId) -> Expr {
        self.expr(
            ty,
            ExprKind::Call {
                callee,
                receiver: None,
                args,
            },
        )
    }

    pub fn method_call(
        &mut self,
        callee: FuncId,
        receiver: Expr,
        args: Vec<Expr>,
        ty: TypeId,
    ) -> Expr {
        self.expr(
            ty,
            ExprKind::Call {
                callee,
                receiver: Some(Box::new(receiver)),
                args,
            },
        )
    }

    // Blocks and statements.

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn block(&mut self) -> BlockId {
        let id = self.block_ids.mint();
        self.cfg
            .add_block(BasicBlock::new(id, SourceLocation::unknown()));
        id
    }

    fn push_stmt(&mut self, block: BlockId, stmt: Stmt) {
        if let Some(block) = self.cfg.block_mut(block) {
            block.push(stmt);
        }
    }

    pub fn decl_stmt(&mut self, block: BlockId, var: VarId, init: Option<Expr>) {
        self.push_stmt(block, Stmt::Decl { var, init });
    }

    pub fn assign(&mut self, block: BlockId, lhs: Expr, rhs: Expr) {
        self.push_stmt(block, Stmt::Assign { lhs, rhs });
    }

    pub fn expr_stmt(&mut self, block: BlockId, expr: Expr) {
        self.push_stmt(block, Stmt::Expr(expr));
    }

    pub fn construct(&mut self, block: BlockId, target: Expr, ctor: FuncId, args: Vec<Expr>) {
        self.push_stmt(block, Stmt::Construct { target, ctor, args });
    }

    pub fn ret(&mut self, block: BlockId, value: Option<Expr>) {
        self.cfg.set_terminator(block, Terminator::Return { value });
    }

    pub fn jump(&mut self, block: BlockId, target: BlockId) {
        self.cfg.set_terminator(block, Terminator::Jump { target });
    }

    pub fn branch(&mut self, block: BlockId, condition: Expr, then_target: BlockId, else_target: BlockId) {
        self.cfg.set_terminator(
            block,
            Terminator::Branch {
                condition,
                then_target,
                else_target,
            },
        );
    }

    pub fn build(self) -> FunctionDecl {
        FunctionDecl {
            id: self.id,
            canonical: self.canonical,
            name: self.name,
            params: self.params,
            locals: self.locals,
            return_ty: self.return_ty,
            kind: self.kind,
            is_defaulted: self.is_defaulted,
            is_builtin: self.is_builtin,
            body: (!self.declaration_only).then_some(self.cfg),
            loc: SourceLocation::unknown(),
            template_key: self.template_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_cfg_validates() {
        let mut tub = TranslationUnitBuilder::new();
        let int = tub.int_type();
        let pint = tub.ptr(int);

        let id = tub.next_func_id();
        let mut f = FunctionBuilder::new(id, "fn", pint);
        let x = f.param("x", pint);
        let entry = f.entry();
        let value = f.var(x, pint);
        f.ret(entry, Some(value));
        let decl = f.build();
        assert!(decl.body.as_ref().unwrap().validate().is_ok());

        tub.add_function(decl);
        let tu = tub.finish();
        assert_eq!(tu.definitions().count(), 1);
        assert_eq!(tu.function(id).unwrap().num_params(), 1);
    }

    #[test]
    fn globals_do_not_collide_with_function_vars() {
        let mut tub = TranslationUnitBuilder::new();
        let int = tub.int_type();
        let g = tub.global("g", int);

        let id = tub.next_func_id();
        let mut f = FunctionBuilder::new(id, "f", int);
        let local = f.local("x", int);
        assert_ne!(g, local);

        tub.add_function(f.build());
        let tu = tub.finish();
        assert!(tu.globals.contains_key(&g));
    }

    #[test]
    fn record_fields_resolve_by_name() {
        let mut tub = TranslationUnitBuilder::new();
        let int = tub.int_type();
        let pint = tub.ptr(int);
        let (record, _ty) = tub.add_record(
            RecordSketch::new("Holder")
                .lifetime_param("a")
                .field_bound("item", pint, "a")
                .field("count", int),
        );

        assert!(tub.field_id(record, "item").is_some());
        assert!(tub.field_id(record, "count").is_some());
        assert!(tub.field_id(record, "missing").is_none());
    }
}
